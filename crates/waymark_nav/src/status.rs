use std::{fmt, ops::BitOr};

use bitflags::bitflags;

/// The result of a navmesh query.
///
/// A status always has exactly one [`Outcome`]. Additional information about
/// the outcome is carried in a [`StatusDetail`] set, e.g. a search that found
/// a path that does not reach the goal is
/// `Status::SUCCESS | StatusDetail::PARTIAL_RESULT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Status {
    outcome: Outcome,
    detail: StatusDetail,
}

/// The mutually exclusive base result of a [`Status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum Outcome {
    /// The operation completed.
    Success,
    /// The operation failed.
    Failure,
    /// The operation is not finished yet, e.g. a sliced path search.
    InProgress,
}

bitflags! {
    /// Details attached to a [`Status`]. These can be freely combined.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    pub struct StatusDetail: u32 {
        /// Input data is not recognized.
        const WRONG_MAGIC = 1 << 0;
        /// Input data is in the wrong version.
        const WRONG_VERSION = 1 << 1;
        /// The operation ran out of memory.
        const OUT_OF_MEMORY = 1 << 2;
        /// An input parameter was invalid.
        const INVALID_PARAM = 1 << 3;
        /// The result buffer was too small to hold the whole result.
        const BUFFER_TOO_SMALL = 1 << 4;
        /// The search ran out of nodes.
        const OUT_OF_NODES = 1 << 5;
        /// The search did not reach the goal and returned the best guess.
        const PARTIAL_RESULT = 1 << 6;
        /// A tile already occupies the requested location.
        const ALREADY_OCCUPIED = 1 << 7;
    }
}

impl Status {
    const FAILURE_BIT: u32 = 1 << 31;
    const SUCCESS_BIT: u32 = 1 << 30;
    const IN_PROGRESS_BIT: u32 = 1 << 29;
    /// Mask of the detail bits in [`Status::bits`].
    pub const DETAIL_MASK: u32 = 0x0ff_ffff;

    /// A plain success.
    pub const SUCCESS: Self = Self::new(Outcome::Success);
    /// A plain failure.
    pub const FAILURE: Self = Self::new(Outcome::Failure);
    /// An operation that is still running.
    pub const IN_PROGRESS: Self = Self::new(Outcome::InProgress);

    const fn new(outcome: Outcome) -> Self {
        Self {
            outcome,
            detail: StatusDetail::empty(),
        }
    }

    /// Shorthand for a failure caused by bad input.
    pub const fn invalid_param() -> Self {
        Self {
            outcome: Outcome::Failure,
            detail: StatusDetail::INVALID_PARAM,
        }
    }

    /// The base result.
    pub fn outcome(self) -> Outcome {
        self.outcome
    }

    /// The detail bits.
    pub fn detail(self) -> StatusDetail {
        self.detail
    }

    /// The same details with a different outcome.
    pub fn with_outcome(self, outcome: Outcome) -> Self {
        Self {
            outcome,
            detail: self.detail,
        }
    }

    /// Returns `true` if the outcome is [`Outcome::Success`].
    pub fn is_success(self) -> bool {
        self.outcome == Outcome::Success
    }

    /// Returns `true` if the outcome is [`Outcome::Failure`].
    pub fn is_failure(self) -> bool {
        self.outcome == Outcome::Failure
    }

    /// Returns `true` if the outcome is [`Outcome::InProgress`].
    pub fn is_in_progress(self) -> bool {
        self.outcome == Outcome::InProgress
    }

    /// Returns `true` if all bits of `detail` are set.
    pub fn contains(self, detail: StatusDetail) -> bool {
        self.detail.contains(detail)
    }

    /// The packed representation: failure `1 << 31`, success `1 << 30`,
    /// in progress `1 << 29`, details in the low bits.
    pub fn bits(self) -> u32 {
        let outcome = match self.outcome {
            Outcome::Success => Self::SUCCESS_BIT,
            Outcome::Failure => Self::FAILURE_BIT,
            Outcome::InProgress => Self::IN_PROGRESS_BIT,
        };
        outcome | self.detail.bits()
    }

    /// Unpacks [`Status::bits`]. Returns `None` unless exactly one outcome bit is set.
    pub fn from_bits(bits: u32) -> Option<Self> {
        let outcome = match bits & !Self::DETAIL_MASK {
            Self::SUCCESS_BIT => Outcome::Success,
            Self::FAILURE_BIT => Outcome::Failure,
            Self::IN_PROGRESS_BIT => Outcome::InProgress,
            _ => return None,
        };
        Some(Self {
            outcome,
            detail: StatusDetail::from_bits_truncate(bits),
        })
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::SUCCESS
    }
}

impl BitOr<StatusDetail> for Status {
    type Output = Status;

    fn bitor(self, rhs: StatusDetail) -> Self::Output {
        Self {
            outcome: self.outcome,
            detail: self.detail | rhs,
        }
    }
}

impl std::ops::BitOrAssign<StatusDetail> for Status {
    fn bitor_assign(&mut self, rhs: StatusDetail) {
        self.detail |= rhs;
    }
}

impl From<Outcome> for Status {
    fn from(outcome: Outcome) -> Self {
        Self::new(outcome)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = match self.outcome {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::InProgress => "in progress",
        };
        f.write_str(outcome)?;
        for (name, _) in self.detail.iter_names() {
            write!(f, " | {}", name.to_lowercase())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_layout() {
        assert_eq!(Status::FAILURE.bits(), 0x8000_0000);
        assert_eq!(Status::SUCCESS.bits(), 0x4000_0000);
        assert_eq!(Status::IN_PROGRESS.bits(), 0x2000_0000);
        assert_eq!(Status::invalid_param().bits(), 0x8000_0008);
        let partial = Status::SUCCESS | StatusDetail::PARTIAL_RESULT | StatusDetail::OUT_OF_NODES;
        assert_eq!(partial.bits(), 0x4000_0060);
        assert_eq!(Status::from_bits(partial.bits()), Some(partial));
    }

    #[test]
    fn outcomes_do_not_mix() {
        assert_eq!(Status::from_bits(0xc000_0000), None);
        assert_eq!(Status::from_bits(0x10), None);
    }

    #[test]
    fn details_survive_outcome_change() {
        let status = Status::IN_PROGRESS | StatusDetail::OUT_OF_NODES;
        let done = status.with_outcome(Outcome::Success);
        assert!(done.is_success());
        assert!(done.contains(StatusDetail::OUT_OF_NODES));
    }

    #[test]
    fn display_lists_details() {
        let status = Status::SUCCESS | StatusDetail::BUFFER_TOO_SMALL;
        assert_eq!(status.to_string(), "success | buffer_too_small");
    }
}
