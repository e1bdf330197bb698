//! Team composition and run limits.

use crate::dreamteam::registry::{AgentSpec, RegistryError};
use std::collections::HashSet;
use std::error::Error;
use std::fmt;
use std::time::Duration;

pub const DEFAULT_MAX_ROUNDS: usize = 50;
pub const DEFAULT_MAX_WALL_TIME: Duration = Duration::from_secs(25 * 60);
pub const DEFAULT_MAX_STALLS_BEFORE_REPLAN: usize = 5;
pub const MAX_STALLS_RANGE: std::ops::RangeInclusive<usize> = 1..=10;
pub const DEFAULT_START_PAGE: &str = "https://www.bing.com";

#[derive(Debug, Clone, PartialEq)]
pub enum TeamConfigError {
    NoAgents,
    InvalidAgent(RegistryError),
    DuplicateName(String),
    InvalidLimit(String),
    InvalidStartPage(String),
}

impl fmt::Display for TeamConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeamConfigError::NoAgents => write!(f, "A team needs at least one agent"),
            TeamConfigError::InvalidAgent(e) => write!(f, "{}", e),
            TeamConfigError::DuplicateName(name) => {
                write!(f, "Agent name '{}' is used more than once", name)
            }
            TeamConfigError::InvalidLimit(msg) => write!(f, "Invalid limit: {}", msg),
            TeamConfigError::InvalidStartPage(msg) => write!(f, "Invalid start page: {}", msg),
        }
    }
}

impl Error for TeamConfigError {}

/// The agents taking part in a run, in order, plus the limits the orchestrator enforces.
#[derive(Debug, Clone)]
pub struct TeamConfig {
    pub agents: Vec<AgentSpec>,
    pub max_rounds: usize,
    pub max_wall_time: Duration,
    pub max_stalls_before_replan: usize,
    /// When false a finished run reports no final answer and counts as failed.
    pub return_final_answer: bool,
    /// First page the web surfer opens.
    pub start_page: String,
}

/// The builtin roles with default limits.
impl Default for TeamConfig {
    fn default() -> Self {
        Self::new(AgentSpec::builtin_defaults())
    }
}

impl TeamConfig {
    pub fn new(agents: Vec<AgentSpec>) -> Self {
        Self {
            agents,
            max_rounds: DEFAULT_MAX_ROUNDS,
            max_wall_time: DEFAULT_MAX_WALL_TIME,
            max_stalls_before_replan: DEFAULT_MAX_STALLS_BEFORE_REPLAN,
            return_final_answer: true,
            start_page: DEFAULT_START_PAGE.to_string(),
        }
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_max_wall_time(mut self, max_wall_time: Duration) -> Self {
        self.max_wall_time = max_wall_time;
        self
    }

    pub fn with_max_stalls_before_replan(mut self, max_stalls: usize) -> Self {
        self.max_stalls_before_replan = max_stalls;
        self
    }

    pub fn with_return_final_answer(mut self, return_final_answer: bool) -> Self {
        self.return_final_answer = return_final_answer;
        self
    }

    pub fn with_start_page(mut self, start_page: impl Into<String>) -> Self {
        self.start_page = start_page.into();
        self
    }

    pub fn validate(&self) -> Result<(), TeamConfigError> {
        if self.agents.is_empty() {
            return Err(TeamConfigError::NoAgents);
        }
        let mut names = HashSet::new();
        for spec in &self.agents {
            spec.validate().map_err(TeamConfigError::InvalidAgent)?;
            if !names.insert(spec.name.as_str()) {
                return Err(TeamConfigError::DuplicateName(spec.name.clone()));
            }
        }
        if self.max_rounds < 1 {
            return Err(TeamConfigError::InvalidLimit(
                "max_rounds must be at least 1".to_string(),
            ));
        }
        if self.max_wall_time.is_zero() {
            return Err(TeamConfigError::InvalidLimit(
                "max_wall_time must be positive".to_string(),
            ));
        }
        if !MAX_STALLS_RANGE.contains(&self.max_stalls_before_replan) {
            return Err(TeamConfigError::InvalidLimit(format!(
                "max_stalls_before_replan must be within {}..={}",
                MAX_STALLS_RANGE.start(),
                MAX_STALLS_RANGE.end()
            )));
        }
        let page = url::Url::parse(&self.start_page)
            .map_err(|e| TeamConfigError::InvalidStartPage(e.to_string()))?;
        if page.scheme() != "http" && page.scheme() != "https" {
            return Err(TeamConfigError::InvalidStartPage(format!(
                "unsupported scheme '{}'",
                page.scheme()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let team = TeamConfig::new(AgentSpec::builtin_defaults());
        assert_eq!(team.max_rounds, 50);
        assert_eq!(team.max_wall_time, Duration::from_secs(1500));
        assert!(team.validate().is_ok());
    }

    #[test]
    fn test_limits_are_checked() {
        let agents = AgentSpec::builtin_defaults();
        assert!(matches!(
            TeamConfig::new(agents.clone()).with_max_rounds(0).validate(),
            Err(TeamConfigError::InvalidLimit(_))
        ));
        assert!(matches!(
            TeamConfig::new(agents.clone())
                .with_max_stalls_before_replan(11)
                .validate(),
            Err(TeamConfigError::InvalidLimit(_))
        ));
        assert!(matches!(
            TeamConfig::new(agents.clone())
                .with_start_page("ftp://example.com")
                .validate(),
            Err(TeamConfigError::InvalidStartPage(_))
        ));
        assert!(matches!(
            TeamConfig::new(Vec::new()).validate(),
            Err(TeamConfigError::NoAgents)
        ));
    }

    #[test]
    fn test_duplicate_names_in_team_are_rejected() {
        let mut agents = AgentSpec::builtin_defaults();
        agents.push(AgentSpec::custom("Coder", "p", "d"));
        assert_eq!(
            TeamConfig::new(agents).validate(),
            Err(TeamConfigError::DuplicateName("Coder".to_string()))
        );
    }
}
