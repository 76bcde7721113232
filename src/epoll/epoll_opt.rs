use std::ops;

/// Triggering mode for a registration: edge-triggered, level-triggered, or
/// one-shot (disarmed after the first delivered event).
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct EpollOpt(u8);

const EDGE: u8 = 0b001;
const LEVEL: u8 = 0b010;
const ONESHOT: u8 = 0b100;

impl EpollOpt {
    #[inline]
    pub fn edge() -> EpollOpt {
        EpollOpt(EDGE)
    }

    #[inline]
    pub fn level() -> EpollOpt {
        EpollOpt(LEVEL)
    }

    #[inline]
    pub fn oneshot() -> EpollOpt {
        EpollOpt(ONESHOT)
    }

    #[inline]
    pub fn is_edge(self) -> bool {
        self.0 & EDGE != 0
    }

    #[inline]
    pub fn is_level(self) -> bool {
        self.0 & LEVEL != 0
    }

    #[inline]
    pub fn is_oneshot(self) -> bool {
        self.0 & ONESHOT != 0
    }
}

impl ops::BitOr for EpollOpt {
    type Output = EpollOpt;

    #[inline]
    fn bitor(self, other: EpollOpt) -> EpollOpt {
        EpollOpt(self.0 | other.0)
    }
}

impl Default for EpollOpt {
    fn default() -> EpollOpt {
        EpollOpt::level()
    }
}
