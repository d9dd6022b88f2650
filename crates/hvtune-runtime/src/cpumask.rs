//! vCPU masks and cpuset lists.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Result, RuntimeError};

/// Upper bound on cpuset expansion for housekeeping CPUs.
pub const CPUSET_EXPANSION_LIMIT: usize = 100;

/// vCPU ids in a mask must be below this, matching libvirt's cpumask length.
pub const CPUMASK_LEN: u32 = 16384;

/// A libvirt-style vCPU mask such as `0-3,^2`.
///
/// Entries are applied left to right. Ranges and single ids only enable an
/// id that no earlier entry mentioned; `^n` always disables. An empty mask
/// enables every vCPU, a non-empty one disables every id it does not list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuMask {
    entries: BTreeMap<u32, bool>,
}

impl CpuMask {
    /// Parses a mask.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InvalidCpuMask`] for an entry that is neither
    /// `n`, `a-b` nor `^n`, for a range whose start exceeds its end, or for
    /// an id of [`CPUMASK_LEN`] or more.
    pub fn parse(mask: &str) -> Result<Self> {
        let mut parsed = Self::default();
        if mask.trim().is_empty() {
            return Ok(parsed);
        }

        let id = |s: &str, entry: &str| -> Result<u32> {
            if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
                return Err(RuntimeError::invalid_cpu_mask(
                    mask,
                    format!("invalid mask value '{entry}'"),
                ));
            }
            s.parse::<u32>()
                .ok()
                .filter(|&vcpu| vcpu < CPUMASK_LEN)
                .ok_or_else(|| {
                    RuntimeError::invalid_cpu_mask(
                        mask,
                        format!("vcpu index out of range in '{entry}', limit is {CPUMASK_LEN}"),
                    )
                })
        };

        for raw in mask.split(',') {
            let entry = raw.trim();
            if let Some(negated) = entry.strip_prefix('^') {
                parsed.entries.insert(id(negated, entry)?, false);
            } else if let Some((start, end)) = entry.split_once('-') {
                let (start, end) = (id(start, entry)?, id(end, entry)?);
                if start > end {
                    return Err(RuntimeError::invalid_cpu_mask(
                        mask,
                        format!("invalid mask range '{start}-{end}'"),
                    ));
                }
                for vcpu in start..=end {
                    parsed.entries.entry(vcpu).or_insert(true);
                }
            } else {
                parsed.entries.entry(id(entry, entry)?).or_insert(true);
            }
        }
        Ok(parsed)
    }

    /// Returns true if `vcpu` is selected.
    #[must_use]
    pub fn is_enabled(&self, vcpu: u32) -> bool {
        if self.entries.is_empty() {
            return true;
        }
        self.entries.get(&vcpu).copied().unwrap_or(false)
    }
}

impl fmt::Display for CpuMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entries.is_empty() {
            return f.write_str("all");
        }
        let enabled: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, on)| **on)
            .map(|(id, _)| id.to_string())
            .collect();
        f.write_str(&enabled.join(","))
    }
}

/// Expands a cpuset list such as `0-2,7` into `[0, 1, 2, 7]`.
///
/// # Errors
///
/// Returns [`RuntimeError::InvalidCpuSet`] for malformed entries, reversed
/// ranges, or when the expansion would exceed `limit` CPUs.
pub fn parse_cpu_set_line(line: &str, limit: usize) -> Result<Vec<u32>> {
    let cpu = |s: &str| -> Result<u32> {
        s.trim()
            .parse()
            .map_err(|_| RuntimeError::invalid_cpu_set(line, format!("invalid cpu '{s}'")))
    };
    let push = |cpus: &mut Vec<u32>, id: u32| -> Result<()> {
        if cpus.len() >= limit {
            return Err(RuntimeError::invalid_cpu_set(
                line,
                format!("rejecting expanding CPU array for safety reasons, limit is {limit}"),
            ));
        }
        cpus.push(id);
        Ok(())
    };

    let mut cpus = Vec::new();
    for item in line.trim().split(',') {
        match item.split_once('-') {
            Some((start, end)) => {
                let (start, end) = (cpu(start)?, cpu(end)?);
                if start > end {
                    return Err(RuntimeError::invalid_cpu_set(
                        line,
                        format!("invalid range '{start}-{end}'"),
                    ));
                }
                for id in start..=end {
                    push(&mut cpus, id)?;
                }
            }
            None => push(&mut cpus, cpu(item)?)?,
        }
    }
    Ok(cpus)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_with_negation() {
        let mask = CpuMask::parse("0-3,^2").unwrap();
        assert!(mask.is_enabled(0));
        assert!(mask.is_enabled(1));
        assert!(!mask.is_enabled(2));
        assert!(mask.is_enabled(3));
        assert!(!mask.is_enabled(4));
        assert_eq!(mask.to_string(), "0,1,3");
    }

    #[test]
    fn test_empty_mask_enables_everything() {
        let mask = CpuMask::parse("").unwrap();
        for vcpu in [0, 1, 17, u32::MAX] {
            assert!(mask.is_enabled(vcpu));
        }
        assert_eq!(mask.to_string(), "all");
    }

    #[test]
    fn test_earlier_negation_survives_later_range() {
        let mask = CpuMask::parse("^1,0-2").unwrap();
        assert!(mask.is_enabled(0));
        assert!(!mask.is_enabled(1));
        assert!(mask.is_enabled(2));
    }

    #[test]
    fn test_singles_and_whitespace() {
        let mask = CpuMask::parse(" 4 , 6 ").unwrap();
        assert!(mask.is_enabled(4));
        assert!(mask.is_enabled(6));
        assert!(!mask.is_enabled(5));
    }

    #[test]
    fn test_invalid_masks() {
        for bad in ["3-1", "a", "1-", "^", "0,,1", "-1", "1-2-3", "^-1"] {
            let err = CpuMask::parse(bad).unwrap_err();
            assert!(
                matches!(err, RuntimeError::InvalidCpuMask { .. }),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_mask_ids_are_bounded() {
        let err = CpuMask::parse("0-4000000000").unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidCpuMask { .. }));
        assert!(CpuMask::parse("^16384").is_err());
        assert!(CpuMask::parse("16384").is_err());

        let mask = CpuMask::parse("0-16383").unwrap();
        assert!(mask.is_enabled(16383));
    }

    #[test]
    fn test_cpu_set_line() {
        assert_eq!(parse_cpu_set_line("0-2,7", 100).unwrap(), vec![0, 1, 2, 7]);
        assert_eq!(parse_cpu_set_line("5", 100).unwrap(), vec![5]);
        assert_eq!(parse_cpu_set_line("1,3\n", 100).unwrap(), vec![1, 3]);
    }

    #[test]
    fn test_cpu_set_line_limit() {
        assert_eq!(parse_cpu_set_line("0-99", 100).unwrap().len(), 100);
        let err = parse_cpu_set_line("0-100", 100).unwrap_err();
        assert!(err.to_string().contains("limit is 100"));
    }

    #[test]
    fn test_cpu_set_line_rejects_malformed() {
        for bad in ["", "x", "3-1", "1,,2", "1-x"] {
            assert!(parse_cpu_set_line(bad, 100).is_err(), "{bad:?}");
        }
    }
}
