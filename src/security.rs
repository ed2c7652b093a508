//! Static risk classification of shell command strings.

use crate::config::env_bool;
use crate::shell_analysis;

/// Ordered risk classification. `Forbidden` sits outside the ordering in
/// spirit: it marks actions that are never executable from the automatic
/// path, approval or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskTier {
    Safe,
    Caution,
    Critical,
    Forbidden,
}

impl RiskTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Safe => "safe",
            RiskTier::Caution => "caution",
            RiskTier::Critical => "critical",
            RiskTier::Forbidden => "forbidden",
        }
    }
}

/// Composite/substitution toggles. Both default off: a Caution-classified
/// command chain can smuggle a Critical one through `&&` or `$()`.
#[derive(Debug, Clone, Copy)]
pub struct ShellOptions {
    pub allow_composites: bool,
    pub allow_substitution: bool,
}

impl Default for ShellOptions {
    fn default() -> Self {
        Self {
            allow_composites: false,
            allow_substitution: false,
        }
    }
}

impl ShellOptions {
    pub fn from_env() -> Self {
        Self {
            allow_composites: env_bool("SHELL_ALLOW_COMPOSITES", false),
            allow_substitution: env_bool("SHELL_ALLOW_SUBSTITUTION", false),
        }
    }
}

pub struct CommandClassifier;

impl CommandClassifier {
    /// Classify with default (restrictive) composite handling.
    pub fn classify(cmd: &str) -> RiskTier {
        Self::classify_with(cmd, &ShellOptions::default())
    }

    pub fn classify_with(cmd: &str, opts: &ShellOptions) -> RiskTier {
        // Normalize: trim and collapse runs of whitespace so spacing tricks
        // don't dodge the pattern matches.
        let normalized: String = cmd.split_whitespace().collect::<Vec<_>>().join(" ");
        if normalized.is_empty() {
            return RiskTier::Safe;
        }
        let target = normalized.as_str();

        let analysis = shell_analysis::analyze_shell_command(target);
        if analysis.has_substitution && !opts.allow_substitution {
            return RiskTier::Critical;
        }
        if analysis.has_composites && !opts.allow_composites {
            return RiskTier::Critical;
        }

        // With composites permitted, grade each segment and take the worst.
        if analysis.segments.len() > 1 {
            return analysis
                .segments
                .iter()
                .map(|s| Self::classify_segment(s))
                .max()
                .unwrap_or(RiskTier::Safe);
        }

        Self::classify_segment(target)
    }

    fn classify_segment(target: &str) -> RiskTier {
        // Privilege escalation, recursive force-delete, raw disk writes,
        // filesystem creation, fork bombs.
        if target.starts_with("sudo")
            || target.contains(" sudo ")
            || target.contains("rm -rf")
            || target.contains("rm -fr")
            || target.contains("dd if=")
            || target.contains("of=/dev/")
            || target.contains("> /dev/")
            || target.contains("mkfs")
            || target.contains(":(){")
            || target.contains(":|:&")
        {
            return RiskTier::Critical;
        }

        // Move/rename, deletes, network copy, permission and ownership
        // changes, output redirection.
        if target.starts_with("rm")
            || target.starts_with("mv")
            || target.starts_with("cp")
            || target.starts_with("scp")
            || target.starts_with("rsync")
            || target.starts_with("curl")
            || target.starts_with("wget")
            || target.starts_with("chmod")
            || target.starts_with("chown")
            || target.contains('>')
        {
            return RiskTier::Caution;
        }

        RiskTier::Safe
    }
}
