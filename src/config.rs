//! Backend configuration for a compilation session.
//!
//! The code generation backend receives two things from the session: a set of [`JitFlags`]
//! derived from the selected [`OptimizationMode`], and the free-form `name=value` options the
//! host passed through. Both are fixed in a [`BackendFlags`] value when the session is built and
//! never change afterwards.
//!
//! Option parsing is deliberately lenient. An entry is accepted only when it contains `=` at a
//! position after the first character; everything else is dropped without an error or a log
//! line. The split happens at the first `=`, so values may contain further `=` characters.
//!
//! # Examples
//!
//! ```rust
//! use aotgraph::config::{BackendFlags, JitFlags, OptimizationMode};
//!
//! let flags = BackendFlags::build(OptimizationMode::PreferSpeed, &["opt=1", "bad", "x=y=z"]);
//! assert!(flags.contains(JitFlags::DEBUG_INFO | JitFlags::SPEED_OPT));
//! assert_eq!(flags.option("x"), Some("y=z"));
//! assert_eq!(flags.options().len(), 2);
//! ```

use std::str::FromStr;

use bitflags::bitflags;
use strum::{Display, EnumIter, EnumString};

use crate::{Error, Result};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    /// Switches handed to the code generation backend
    pub struct JitFlags: u32 {
        /// Emit debug information for the generated code
        const DEBUG_INFO = 0x0001;
        /// Generate debuggable, unoptimized code
        const DEBUG_CODE = 0x0002;
        /// Optimize for code size
        const SIZE_OPT = 0x0004;
        /// Optimize for execution speed
        const SPEED_OPT = 0x0008;
    }
}

/// The optimization policy of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, EnumIter)]
#[strum(ascii_case_insensitive)]
pub enum OptimizationMode {
    /// No optimization; code stays debuggable
    #[strum(to_string = "none")]
    None,
    /// Favor small code
    #[strum(to_string = "prefer-size", serialize = "size")]
    PreferSize,
    /// Favor fast code
    #[strum(to_string = "prefer-speed", serialize = "speed")]
    PreferSpeed,
    /// Balance size and speed
    #[default]
    #[strum(to_string = "blended", serialize = "default")]
    Blended,
}

impl OptimizationMode {
    /// Parses a mode name as given on a command line.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for names that denote no mode.
    pub fn parse(value: &str) -> Result<Self> {
        OptimizationMode::from_str(value)
            .map_err(|_| Error::Configuration(format!("unknown optimization mode '{value}'")))
    }

    /// The backend switches selected by this mode, excluding [`JitFlags::DEBUG_INFO`].
    #[must_use]
    pub fn jit_flags(self) -> JitFlags {
        match self {
            OptimizationMode::None => JitFlags::DEBUG_CODE,
            OptimizationMode::PreferSize => JitFlags::SIZE_OPT,
            OptimizationMode::PreferSpeed => JitFlags::SPEED_OPT,
            OptimizationMode::Blended => JitFlags::empty(),
        }
    }
}

/// A single `name=value` backend option.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendOption {
    /// Text before the first `=`; never empty
    pub name: String,
    /// Text after the first `=`; may be empty or contain `=`
    pub value: String,
}

impl BackendOption {
    /// Parses a raw option, returning `None` if it has no name.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.find('=') {
            Some(index) if index >= 1 => Some(BackendOption {
                name: raw[..index].to_string(),
                value: raw[index + 1..].to_string(),
            }),
            _ => None,
        }
    }
}

/// Parses raw backend options, keeping accepted entries in input order.
pub fn parse_backend_options<S: AsRef<str>>(raw: &[S]) -> Vec<BackendOption> {
    raw.iter()
        .filter_map(|option| BackendOption::parse(option.as_ref()))
        .collect()
}

/// The immutable backend configuration of a session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BackendFlags {
    flags: JitFlags,
    options: Vec<BackendOption>,
}

impl BackendFlags {
    /// Builds the backend configuration for `mode` from raw option strings.
    ///
    /// [`JitFlags::DEBUG_INFO`] is always set. Every call yields an independent value.
    pub fn build<S: AsRef<str>>(mode: OptimizationMode, raw_options: &[S]) -> Self {
        Self::from_parts(mode, parse_backend_options(raw_options))
    }

    /// Builds the configuration from options which were already parsed.
    #[must_use]
    pub fn from_parts(mode: OptimizationMode, options: Vec<BackendOption>) -> Self {
        BackendFlags {
            flags: JitFlags::DEBUG_INFO | mode.jit_flags(),
            options,
        }
    }

    /// The backend switches.
    #[must_use]
    pub fn flags(&self) -> JitFlags {
        self.flags
    }

    /// Returns `true` if all of `flags` are set.
    #[must_use]
    pub fn contains(&self, flags: JitFlags) -> bool {
        self.flags.contains(flags)
    }

    /// Every accepted option, in input order.
    #[must_use]
    pub fn options(&self) -> &[BackendOption] {
        &self.options
    }

    /// Looks up an option value; the last occurrence of a repeated name wins.
    #[must_use]
    pub fn option(&self, name: &str) -> Option<&str> {
        self.options
            .iter()
            .rev()
            .find(|option| option.name == name)
            .map(|option| option.value.as_str())
    }
}
