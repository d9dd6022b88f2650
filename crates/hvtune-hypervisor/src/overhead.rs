//! Memory overhead calculator.
//!
//! Computes the memory a guest needs on the host beyond what the guest
//! itself sees: pagetables, the helper processes around the guest runtime,
//! per-vCPU bookkeeping and surcharges for firmware, passthrough devices and
//! encrypted memory.
//!
//! The calculation is a pure function of its inputs. Nothing is cached.

use std::fmt;
use std::str::FromStr;

use hvtune_api::{Quantity, VirtualMachine};
use serde::Serialize;

use crate::error::{HypervisorError, Result};

/// Launcher (supervisor) process.
pub const LAUNCHER_OVERHEAD: Quantity = Quantity::mebibytes(100);
/// Monitor process.
pub const MONITOR_OVERHEAD: Quantity = Quantity::mebibytes(25);
/// Log daemon.
pub const LOG_DAEMON_OVERHEAD: Quantity = Quantity::mebibytes(25);
/// Runtime management daemon.
pub const MANAGEMENT_DAEMON_OVERHEAD: Quantity = Quantity::mebibytes(40);
/// Guest runtime process itself.
pub const GUEST_RUNTIME_OVERHEAD: Quantity = Quantity::mebibytes(30);
/// Each vCPU.
pub const VCPU_OVERHEAD: Quantity = Quantity::mebibytes(8);
/// The single I/O thread.
pub const IO_THREAD_OVERHEAD: Quantity = Quantity::mebibytes(8);
/// Video RAM of the default graphics device.
pub const VIDEO_RAM_OVERHEAD: Quantity = Quantity::mebibytes(32);
/// UEFI firmware emulation on architectures that boot through it.
pub const UEFI_OVERHEAD: Quantity = Quantity::mebibytes(128);
/// DMA mapping bookkeeping for passthrough devices.
pub const ISOLATED_DEVICE_OVERHEAD: Quantity = Quantity::gibibytes(1);
/// Encrypted memory launch.
pub const ENCRYPTED_LAUNCH_OVERHEAD: Quantity = Quantity::mebibytes(256);

/// Guest memory divided by this gives the pagetable cost.
const PAGETABLE_DIVISOR: u64 = 512;

/// Largest number of fractional digits accepted in a ratio.
const MAX_RATIO_SCALE: usize = 18;

/// Sum of the fixed per-process overheads.
#[must_use]
pub fn fixed_process_overhead() -> Quantity {
    [
        LAUNCHER_OVERHEAD,
        MONITOR_OVERHEAD,
        LOG_DAEMON_OVERHEAD,
        MANAGEMENT_DAEMON_OVERHEAD,
        GUEST_RUNTIME_OVERHEAD,
    ]
    .into_iter()
    .sum()
}

/// Returns true if guests of `arch` boot through emulated UEFI firmware.
#[must_use]
pub fn requires_uefi(arch: &str) -> bool {
    matches!(arch, "arm64" | "aarch64")
}

/// Individual terms of the overhead, before the ratio is applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverheadBreakdown {
    pub pagetable: Quantity,
    pub processes: Quantity,
    pub vcpus: Quantity,
    pub graphics: Quantity,
    pub firmware: Quantity,
    pub isolated_devices: Quantity,
    pub encrypted_launch: Quantity,
}

impl OverheadBreakdown {
    /// Sum of all terms.
    #[must_use]
    pub fn total(&self) -> Quantity {
        [
            self.pagetable,
            self.processes,
            self.vcpus,
            self.graphics,
            self.firmware,
            self.isolated_devices,
            self.encrypted_launch,
        ]
        .into_iter()
        .sum()
    }
}

/// Computes each overhead term for `vm` on `arch`.
///
/// A guest without any memory setting contributes no pagetable cost.
#[must_use]
pub fn overhead_breakdown(vm: &VirtualMachine, arch: &str) -> OverheadBreakdown {
    let memory = vm.guest_base_memory().unwrap_or(Quantity::ZERO);
    let pagetable = memory.round_up_to_kilo().bytes() / PAGETABLE_DIVISOR;

    let vcpus = VCPU_OVERHEAD
        .bytes()
        .saturating_mul(vm.vcpu_count())
        .saturating_add(IO_THREAD_OVERHEAD.bytes());

    let pick = |enabled: bool, amount: Quantity| if enabled { amount } else { Quantity::ZERO };

    OverheadBreakdown {
        pagetable: Quantity::from_bytes(pagetable),
        processes: fixed_process_overhead(),
        vcpus: Quantity::from_bytes(vcpus),
        graphics: pick(vm.has_graphics_device(), VIDEO_RAM_OVERHEAD),
        firmware: pick(requires_uefi(arch), UEFI_OVERHEAD),
        isolated_devices: pick(vm.has_isolated_devices(), ISOLATED_DEVICE_OVERHEAD),
        encrypted_launch: pick(vm.has_encrypted_launch(), ENCRYPTED_LAUNCH_OVERHEAD),
    }
}

/// A non-negative decimal multiplier held as an exact fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverheadRatio {
    numerator: u128,
    denominator: u128,
}

impl OverheadRatio {
    /// The identity ratio.
    pub const ONE: Self = Self {
        numerator: 1,
        denominator: 1,
    };

    /// Parses an optional ratio; `None` and blank strings are the identity.
    ///
    /// # Errors
    ///
    /// Returns [`HypervisorError::InvalidOverheadRatio`] if `value` is set but
    /// not a non-negative decimal number.
    pub fn from_option(value: Option<&str>) -> Result<Self> {
        match value {
            Some(v) if !v.trim().is_empty() => v.parse(),
            _ => Ok(Self::ONE),
        }
    }

    /// Multiplies `quantity` by the ratio, rounding half up to whole bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the product does not fit in a byte count.
    pub fn apply(&self, quantity: Quantity) -> Result<Quantity> {
        let product = u128::from(quantity.bytes())
            .checked_mul(self.numerator)
            .and_then(|p| p.checked_add(self.denominator / 2))
            .map(|p| p / self.denominator)
            .and_then(|p| u64::try_from(p).ok())
            .ok_or_else(|| HypervisorError::InvalidOverheadRatio {
                value: self.to_string(),
                reason: format!("scaled overhead of {quantity} overflows"),
            })?;
        Ok(Quantity::from_bytes(product))
    }

    #[must_use]
    pub fn is_one(&self) -> bool {
        self.numerator == self.denominator
    }
}

impl FromStr for OverheadRatio {
    type Err = HypervisorError;

    fn from_str(raw: &str) -> Result<Self> {
        let invalid = |reason: &str| HypervisorError::InvalidOverheadRatio {
            value: raw.to_string(),
            reason: reason.to_string(),
        };

        let s = raw.trim();
        let s = s.strip_prefix('+').unwrap_or(s);
        if s.starts_with('-') {
            return Err(invalid("must not be negative"));
        }
        let (whole, frac) = s.split_once('.').unwrap_or((s, ""));
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid("missing numeric value"));
        }
        if !whole.bytes().chain(frac.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(invalid("expected a decimal number"));
        }
        if frac.len() > MAX_RATIO_SCALE {
            return Err(invalid("too many fractional digits"));
        }

        let numerator: u128 = format!("{whole}{frac}")
            .parse()
            .map_err(|_| invalid("value out of range"))?;
        let denominator = 10u128.pow(frac.len() as u32);
        Ok(Self {
            numerator,
            denominator,
        })
    }
}

impl fmt::Display for OverheadRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scale = self.denominator.ilog10() as usize;
        let whole = self.numerator / self.denominator;
        if scale == 0 {
            return write!(f, "{whole}");
        }
        let frac = self.numerator % self.denominator;
        write!(f, "{whole}.{frac:0scale$}")
    }
}

/// Computes the additional memory `vm` needs on `arch`.
///
/// `ratio` multiplies the whole total when set.
///
/// # Errors
///
/// Returns [`HypervisorError::InvalidOverheadRatio`] for a malformed ratio.
pub fn memory_overhead(vm: &VirtualMachine, arch: &str, ratio: Option<&str>) -> Result<Quantity> {
    let ratio = OverheadRatio::from_option(ratio)?;
    let breakdown = overhead_breakdown(vm, arch);
    let total = ratio.apply(breakdown.total())?;
    tracing::trace!(
        vm = %vm.display_name(),
        arch,
        %ratio,
        total = total.bytes(),
        "computed memory overhead"
    );
    Ok(total)
}

#[cfg(test)]
mod tests {
    use hvtune_api::{Cpu, Gpu, LaunchSecurity, Sev};

    use super::*;

    fn vm(memory: Quantity, cores: u32) -> VirtualMachine {
        let mut vm = VirtualMachine::with_memory_request("testvm", memory);
        vm.spec.domain.cpu = Some(Cpu {
            cores,
            ..Default::default()
        });
        vm
    }

    #[test]
    fn test_fixed_process_overhead() {
        assert_eq!(fixed_process_overhead(), Quantity::mebibytes(220));
    }

    #[test]
    fn test_breakdown_for_plain_guest() {
        let b = overhead_breakdown(&vm(Quantity::gibibytes(1), 2), "amd64");
        assert_eq!(b.pagetable.bytes(), 1_073_742_000 / 512);
        assert_eq!(b.processes, Quantity::mebibytes(220));
        assert_eq!(b.vcpus, Quantity::mebibytes(24));
        assert_eq!(b.graphics, Quantity::mebibytes(32));
        assert_eq!(b.firmware, Quantity::ZERO);
        assert_eq!(b.isolated_devices, Quantity::ZERO);
        assert_eq!(b.encrypted_launch, Quantity::ZERO);
    }

    #[test]
    fn test_feature_surcharges() {
        let mut guest = vm(Quantity::gibibytes(1), 1);
        guest.spec.domain.devices.autoattach_graphics_device = Some(false);
        guest.spec.domain.devices.gpus.push(Gpu {
            name: "gpu0".into(),
            device_name: "nvidia.com/GP100".into(),
        });
        guest.spec.domain.launch_security = Some(LaunchSecurity {
            sev: Some(Sev::default()),
            snp: None,
        });

        let b = overhead_breakdown(&guest, "arm64");
        assert_eq!(b.graphics, Quantity::ZERO);
        assert_eq!(b.firmware, UEFI_OVERHEAD);
        assert_eq!(b.isolated_devices, ISOLATED_DEVICE_OVERHEAD);
        assert_eq!(b.encrypted_launch, ENCRYPTED_LAUNCH_OVERHEAD);
    }

    #[test]
    fn test_realtime_adds_nothing() {
        let plain = vm(Quantity::gibibytes(2), 4);
        let mut realtime = plain.clone();
        if let Some(cpu) = realtime.spec.domain.cpu.as_mut() {
            cpu.dedicated_cpu_placement = true;
            cpu.realtime = Some(Default::default());
        }
        assert_eq!(
            memory_overhead(&plain, "amd64", None).unwrap(),
            memory_overhead(&realtime, "amd64", None).unwrap()
        );
    }

    #[test]
    fn test_missing_memory_has_no_pagetable_cost() {
        let b = overhead_breakdown(&VirtualMachine::default(), "amd64");
        assert_eq!(b.pagetable, Quantity::ZERO);
        assert_eq!(b.vcpus, Quantity::mebibytes(16));
    }

    #[test]
    fn test_ratio_parse_and_display() {
        let ratio: OverheadRatio = "1.25".parse().unwrap();
        assert_eq!(ratio.to_string(), "1.25");
        assert!(!ratio.is_one());
        assert!("1.0".parse::<OverheadRatio>().unwrap().is_one());
        assert!("1".parse::<OverheadRatio>().unwrap().is_one());
        assert_eq!("2".parse::<OverheadRatio>().unwrap().to_string(), "2");
        assert_eq!(".5".parse::<OverheadRatio>().unwrap().to_string(), "0.5");
        assert_eq!(
            "1.05".parse::<OverheadRatio>().unwrap().to_string(),
            "1.05"
        );
    }

    #[test]
    fn test_ratio_rejects_malformed() {
        for bad in ["", "abc", "-1.5", "1.2.3", "1e3", ".", "1,5"] {
            let err = bad.parse::<OverheadRatio>().unwrap_err();
            assert!(
                matches!(err, HypervisorError::InvalidOverheadRatio { .. }),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_from_option_blank_is_identity() {
        assert!(OverheadRatio::from_option(None).unwrap().is_one());
        assert!(OverheadRatio::from_option(Some("")).unwrap().is_one());
        assert!(OverheadRatio::from_option(Some(" \t")).unwrap().is_one());
        assert!(OverheadRatio::from_option(Some("x")).is_err());
    }

    #[test]
    fn test_ratio_rounds_half_up() {
        let half: OverheadRatio = "0.5".parse().unwrap();
        assert_eq!(half.apply(Quantity::from_bytes(3)).unwrap().bytes(), 2);
        assert_eq!(half.apply(Quantity::from_bytes(4)).unwrap().bytes(), 2);

        let third: OverheadRatio = "0.3".parse().unwrap();
        // 7 * 0.3 = 2.1
        assert_eq!(third.apply(Quantity::from_bytes(7)).unwrap().bytes(), 2);
        // 5 * 0.3 = 1.5
        assert_eq!(third.apply(Quantity::from_bytes(5)).unwrap().bytes(), 2);
    }

    #[test]
    fn test_ratio_scales_whole_total() {
        let guest = vm(Quantity::gibibytes(1), 2);
        let base = memory_overhead(&guest, "amd64", None).unwrap();
        let doubled = memory_overhead(&guest, "amd64", Some("2")).unwrap();
        assert_eq!(doubled.bytes(), base.bytes() * 2);
        let zero = memory_overhead(&guest, "amd64", Some("0")).unwrap();
        assert_eq!(zero, Quantity::ZERO);
    }

    #[test]
    fn test_ratio_overflow_is_error() {
        let big: OverheadRatio = "100000000000".parse().unwrap();
        assert!(big.apply(Quantity::from_bytes(u64::MAX / 2)).is_err());
    }
}
