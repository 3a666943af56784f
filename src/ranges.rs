use std::{fmt, iter::FusedIterator, str::FromStr};

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RangeError {
    #[error("allowed port specification is empty")]
    Empty,
    #[error("invalid port number '{0}'")]
    InvalidPort(String),
    #[error("invalid port range {start}-{end}: start must not be greater than end")]
    InvalidRange { start: u16, end: u16 },
}

/// An inclusive interval of ports. A single port is a range with `start == end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Result<Self, RangeError> {
        if start > end {
            return Err(RangeError::InvalidRange { start, end });
        }
        Ok(PortRange { start, end })
    }

    pub fn len(&self) -> usize {
        usize::from(self.end - self.start) + 1
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

impl FromStr for PortRange {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(RangeError::Empty);
        }
        match s.split_once('-') {
            Some((start, end)) => PortRange::new(parse_port(start)?, parse_port(end)?),
            None => {
                let port = parse_port(s)?;
                PortRange::new(port, port)
            }
        }
    }
}

fn parse_port(s: &str) -> Result<u16, RangeError> {
    let s = s.trim();
    match s.parse::<u16>() {
        // Port 0 means "any port" to the OS, it can never be handed out.
        Ok(0) | Err(_) => Err(RangeError::InvalidPort(s.to_string())),
        Ok(port) => Ok(port),
    }
}

/// The allowed ports, in the order the operator wrote them.
///
/// Ranges are neither sorted nor merged: overlapping or repeated ranges are
/// kept as written and will be visited again by the sequencer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRanges(Vec<PortRange>);

impl PortRanges {
    /// Total number of candidates a sequencer will produce, repeats included.
    pub fn len_ports(&self) -> usize {
        self.0.iter().map(PortRange::len).sum()
    }

    pub fn sequencer(&self) -> PortSequencer {
        PortSequencer::new(self.clone())
    }
}

impl FromStr for PortRanges {
    type Err = RangeError;

    /// Parse `RANGE(,RANGE)*` where `RANGE` is `N` or `N-M`, e.g. `6008-6010,6017`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ranges = s
            .split(',')
            .map(str::parse)
            .collect::<Result<Vec<PortRange>, _>>()?;
        Ok(PortRanges(ranges))
    }
}

impl fmt::Display for PortRanges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(PortRange::to_string).collect();
        write!(f, "{}", parts.join(","))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    At { index: usize, port: u16 },
    Exhausted,
}

/// Single-pass producer of candidate ports.
///
/// Walks every range in order, ascending within a range. Once the last range
/// is consumed the sequencer stays exhausted; it never wraps around.
#[derive(Debug)]
pub struct PortSequencer {
    ranges: PortRanges,
    cursor: Cursor,
}

impl PortSequencer {
    pub fn new(ranges: PortRanges) -> Self {
        let cursor = match ranges.0.first() {
            Some(first) => Cursor::At {
                index: 0,
                port: first.start,
            },
            None => Cursor::Exhausted,
        };
        PortSequencer { ranges, cursor }
    }
}

impl Iterator for PortSequencer {
    type Item = u16;

    fn next(&mut self) -> Option<u16> {
        let Cursor::At { index, port } = self.cursor else {
            return None;
        };
        let end = self.ranges.0[index].end;
        self.cursor = if port < end {
            Cursor::At {
                index,
                port: port + 1,
            }
        } else {
            match self.ranges.0.get(index + 1) {
                Some(range) => Cursor::At {
                    index: index + 1,
                    port: range.start,
                },
                None => Cursor::Exhausted,
            }
        };
        Some(port)
    }
}

impl FusedIterator for PortSequencer {}

#[cfg(test)]
mod tests {
    use quickcheck_macros::quickcheck;

    use super::*;

    fn sequence(spec: &str) -> Vec<u16> {
        spec.parse::<PortRanges>().unwrap().sequencer().collect()
    }

    #[test]
    fn test_mixed_ranges_in_order() {
        let mut seq = "6008-6010,6017".parse::<PortRanges>().unwrap().sequencer();
        assert_eq!(seq.next(), Some(6008));
        assert_eq!(seq.next(), Some(6009));
        assert_eq!(seq.next(), Some(6010));
        assert_eq!(seq.next(), Some(6017));
        assert_eq!(seq.next(), None);
        assert_eq!(seq.next(), None);
        assert_eq!(seq.cursor, Cursor::Exhausted);
    }

    #[test]
    fn test_single_port() {
        assert_eq!(sequence("7000"), vec![7000]);
        assert_eq!(sequence("7000,7005-7006"), vec![7000, 7005, 7006]);
    }

    #[test]
    fn test_author_order_and_repeats_are_kept() {
        assert_eq!(sequence("9000-9001,80,9000"), vec![9000, 9001, 80, 9000]);
    }

    #[test]
    fn test_whitespace_is_ignored() {
        assert_eq!(sequence(" 6008 - 6009 , 6017 "), vec![6008, 6009, 6017]);
    }

    #[test]
    fn test_top_of_port_space_does_not_overflow() {
        assert_eq!(sequence("65534-65535"), vec![65534, 65535]);
    }

    #[test]
    fn test_reversed_range_is_rejected() {
        assert_eq!(
            "5-3".parse::<PortRanges>(),
            Err(RangeError::InvalidRange { start: 5, end: 3 })
        );
    }

    #[test]
    fn test_malformed_specs_are_rejected() {
        assert_eq!("".parse::<PortRanges>(), Err(RangeError::Empty));
        assert_eq!("6008,".parse::<PortRanges>(), Err(RangeError::Empty));
        assert_eq!(
            "60o8".parse::<PortRanges>(),
            Err(RangeError::InvalidPort("60o8".to_string()))
        );
        assert_eq!(
            "6008-".parse::<PortRanges>(),
            Err(RangeError::InvalidPort("".to_string()))
        );
        assert_eq!(
            "1-70000".parse::<PortRanges>(),
            Err(RangeError::InvalidPort("70000".to_string()))
        );
        assert_eq!(
            "0-10".parse::<PortRanges>(),
            Err(RangeError::InvalidPort("0".to_string()))
        );
    }

    #[test]
    fn test_display_and_counts() {
        let ranges: PortRanges = "6008-6010, 6017".parse().unwrap();
        assert_eq!(ranges.to_string(), "6008-6010,6017");
        assert_eq!(ranges.len_ports(), 4);
    }

    #[quickcheck]
    fn prop_sequence_is_concatenation_of_ranges(bounds: Vec<(u16, u8)>) -> bool {
        let ranges: Vec<PortRange> = bounds
            .iter()
            .map(|&(start, width)| {
                let start = start.max(1);
                PortRange::new(start, start.saturating_add(u16::from(width))).unwrap()
            })
            .collect();
        if ranges.is_empty() {
            return true;
        }
        let expected: Vec<u16> = ranges.iter().flat_map(|r| r.start..=r.end).collect();

        let spec = PortRanges(ranges).to_string();
        let mut seq = spec.parse::<PortRanges>().unwrap().sequencer();
        let produced: Vec<u16> = seq.by_ref().collect();
        produced == expected && seq.next().is_none()
    }
}
