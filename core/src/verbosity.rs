use log::LevelFilter;

/// Verbosity slider: 1 = silent, 2 = critical, 3 = error, 4 = warn,
/// 5 = info, 6 and above = debug
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Verbosity(u8);

impl Verbosity {
    pub const SILENT: Verbosity = Verbosity(1);
    pub const INFO: Verbosity = Verbosity(5);
    pub const DEBUG: Verbosity = Verbosity(6);

    pub fn new(level: u8) -> Self {
        Verbosity(level.max(1))
    }

    pub fn level(self) -> u8 {
        self.0
    }

    /// `log` has no critical level, so critical and error share `Error`
    pub fn level_filter(self) -> LevelFilter {
        match self.0 {
            0 | 1 => LevelFilter::Off,
            2 | 3 => LevelFilter::Error,
            4 => LevelFilter::Warn,
            5 => LevelFilter::Info,
            _ => LevelFilter::Debug,
        }
    }

    /// Set the global `log` ceiling
    pub fn apply(self) {
        log::set_max_level(self.level_filter());
    }
}

impl Default for Verbosity {
    fn default() -> Self {
        Verbosity::INFO
    }
}

impl From<u8> for Verbosity {
    fn from(level: u8) -> Self {
        Verbosity::new(level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_filter_mapping() {
        assert_eq!(Verbosity::new(0).level_filter(), LevelFilter::Off);
        assert_eq!(Verbosity::SILENT.level_filter(), LevelFilter::Off);
        assert_eq!(Verbosity::new(2).level_filter(), LevelFilter::Error);
        assert_eq!(Verbosity::new(3).level_filter(), LevelFilter::Error);
        assert_eq!(Verbosity::new(4).level_filter(), LevelFilter::Warn);
        assert_eq!(Verbosity::default().level_filter(), LevelFilter::Info);
        assert_eq!(Verbosity::new(9).level_filter(), LevelFilter::Debug);
    }

    #[test]
    fn test_zero_clamps_to_silent() {
        assert_eq!(Verbosity::new(0), Verbosity::SILENT);
    }
}
