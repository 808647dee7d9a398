//! Boot-time configuration.
//!
//! The scheduling policy is fixed for the lifetime of a [`Kernel`]: it is
//! chosen once, either programmatically through
//! [`SystemConfigurationBuilder`] or from the kernel command line through
//! [`SystemConfiguration::from_cmdline`].
//!
//! | Command line  | Effect                                   |
//! |---------------|------------------------------------------|
//! | `-o priority` | strict priority scheduling (the default) |
//! | `-o mlfqs`    | multi-level feedback queue scheduling    |
//! | `-o donate`   | enable priority donation                 |
//! | `-o nodonate` | disable priority donation                |
//! | `-ts=N`       | time slice of `N` ticks                  |
//! | `-hz=N`       | timer frequency of `N` ticks per second  |
//!
//! [`Kernel`]: crate::Kernel
use alloc::string::{String, ToString};

/// Default number of ticks a thread runs before it is preempted in favour of
/// another thread of the same priority.
pub const TIME_SLICE: u64 = 4;

/// The policy that computes thread priorities.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SchedulingPolicy {
    /// Priorities are set by the threads themselves, possibly raised by
    /// donation.
    #[default]
    Priority,
    /// Priorities are computed by the kernel from `nice` and `recent_cpu`.
    Mlfqs,
}

/// Error of building a [`SystemConfiguration`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// The command line contains an option the kernel does not know.
    UnknownOption(String),
    /// The option requires a value but none was given.
    MissingValue(&'static str),
    /// The value of the option is malformed or out of range.
    InvalidValue(&'static str),
    /// Both `-o priority` and `-o mlfqs` were given.
    ConflictingPolicies,
    /// Priority donation was requested together with MLFQS.
    DonationUnderMlfqs,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConfigError::UnknownOption(opt) => write!(f, "unknown option `{opt}`"),
            ConfigError::MissingValue(opt) => write!(f, "option `{opt}` requires a value"),
            ConfigError::InvalidValue(opt) => write!(f, "invalid value for {opt}"),
            ConfigError::ConflictingPolicies => {
                f.write_str("more than one scheduling policy selected")
            }
            ConfigError::DonationUnderMlfqs => {
                f.write_str("priority donation cannot be combined with mlfqs")
            }
        }
    }
}

impl core::error::Error for ConfigError {}

/// The configuration a [`Kernel`] boots with.
///
/// A configuration is either the [`Default`] one or the product of
/// [`SystemConfigurationBuilder::build`] or
/// [`SystemConfiguration::from_cmdline`], so every configuration that reaches
/// [`Kernel::boot`] has been validated. It cannot be put together by hand:
///
/// ```compile_fail
/// use kesched::{SchedulingPolicy, SystemConfiguration};
///
/// let config = SystemConfiguration {
///     policy: SchedulingPolicy::Mlfqs,
///     priority_donation: true,
///     time_slice: 4,
///     timer_freq: 0,
/// };
/// ```
///
/// [`Kernel`]: crate::Kernel
/// [`Kernel::boot`]: crate::Kernel::boot
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SystemConfiguration {
    policy: SchedulingPolicy,
    priority_donation: bool,
    time_slice: u64,
    timer_freq: u64,
}

impl Default for SystemConfiguration {
    fn default() -> Self {
        Self {
            policy: SchedulingPolicy::Priority,
            priority_donation: true,
            time_slice: TIME_SLICE,
            timer_freq: abyss::timer::TIMER_FREQ,
        }
    }
}

impl SystemConfiguration {
    /// The scheduling policy.
    pub fn policy(&self) -> SchedulingPolicy {
        self.policy
    }

    /// Whether lock waiters lend their priority to the lock holder. Always
    /// false under [`SchedulingPolicy::Mlfqs`].
    pub fn priority_donation(&self) -> bool {
        self.priority_donation
    }

    /// Number of ticks in a time slice. Never zero.
    pub fn time_slice(&self) -> u64 {
        self.time_slice
    }

    /// Number of timer ticks per second. Never zero.
    pub fn timer_freq(&self) -> u64 {
        self.timer_freq
    }

    /// Starts building a configuration from the defaults.
    pub fn builder() -> SystemConfigurationBuilder {
        SystemConfigurationBuilder::new()
    }

    /// Parses the scheduler options of a kernel command line.
    ///
    /// Options are separated by whitespace. See the [module
    /// documentation](self) for the accepted options.
    pub fn from_cmdline(cmdline: &str) -> Result<Self, ConfigError> {
        let mut builder = SystemConfigurationBuilder::new();
        let mut policy = None;
        let mut tokens = cmdline.split_whitespace();
        while let Some(token) = tokens.next() {
            match token {
                "-o" => match tokens.next().ok_or(ConfigError::MissingValue("-o"))? {
                    "mlfqs" => policy = Some(select(policy, SchedulingPolicy::Mlfqs)?),
                    "priority" => policy = Some(select(policy, SchedulingPolicy::Priority)?),
                    "donate" => builder = builder.priority_donation(true),
                    "nodonate" => builder = builder.priority_donation(false),
                    other => return Err(ConfigError::UnknownOption(other.to_string())),
                },
                _ => {
                    if let Some(value) = token.strip_prefix("-ts=") {
                        builder = builder.time_slice(parse(value, "time slice")?);
                    } else if let Some(value) = token.strip_prefix("-hz=") {
                        builder = builder.timer_freq(parse(value, "timer frequency")?);
                    } else {
                        return Err(ConfigError::UnknownOption(token.to_string()));
                    }
                }
            }
        }
        if let Some(policy) = policy {
            builder = builder.policy(policy);
        }
        let config = builder.build()?;
        log::debug!("Config: `{cmdline}` parsed into {config:?}.");
        Ok(config)
    }
}

fn select(
    current: Option<SchedulingPolicy>,
    policy: SchedulingPolicy,
) -> Result<SchedulingPolicy, ConfigError> {
    match current {
        Some(current) if current != policy => Err(ConfigError::ConflictingPolicies),
        _ => Ok(policy),
    }
}

fn parse(value: &str, what: &'static str) -> Result<u64, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue(what))
}

/// A builder for system configuration settings.
///
/// The [`SystemConfigurationBuilder`] struct provides an interface for
/// configuring the scheduler before the kernel boots. Settings that are not
/// given keep their defaults; priority donation defaults to on for the
/// priority policy and off for MLFQS.
#[derive(Clone, Debug, Default)]
pub struct SystemConfigurationBuilder {
    policy: SchedulingPolicy,
    priority_donation: Option<bool>,
    time_slice: Option<u64>,
    timer_freq: Option<u64>,
}

impl SystemConfigurationBuilder {
    /// Creates a builder holding the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the system-wide scheduling policy.
    pub fn policy(mut self, policy: SchedulingPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Enables or disables priority donation.
    pub fn priority_donation(mut self, enabled: bool) -> Self {
        self.priority_donation = Some(enabled);
        self
    }

    /// Sets the number of ticks in a time slice.
    pub fn time_slice(mut self, ticks: u64) -> Self {
        self.time_slice = Some(ticks);
        self
    }

    /// Sets the number of timer ticks per second.
    pub fn timer_freq(mut self, hz: u64) -> Self {
        self.timer_freq = Some(hz);
        self
    }

    /// Validates the settings.
    pub fn build(self) -> Result<SystemConfiguration, ConfigError> {
        let priority_donation = match (self.policy, self.priority_donation) {
            (SchedulingPolicy::Mlfqs, Some(true)) => return Err(ConfigError::DonationUnderMlfqs),
            (SchedulingPolicy::Mlfqs, _) => false,
            (SchedulingPolicy::Priority, donation) => donation.unwrap_or(true),
        };
        let time_slice = self.time_slice.unwrap_or(TIME_SLICE);
        if time_slice == 0 {
            return Err(ConfigError::InvalidValue("time slice"));
        }
        let timer_freq = self.timer_freq.unwrap_or(abyss::timer::TIMER_FREQ);
        if timer_freq == 0 {
            return Err(ConfigError::InvalidValue("timer frequency"));
        }
        Ok(SystemConfiguration {
            policy: self.policy,
            priority_donation,
            time_slice,
            timer_freq,
        })
    }
}
