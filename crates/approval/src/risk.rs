use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Impact shown to the human deciding on an approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(&format!("(?i){p}")).unwrap())
        .collect()
}

static HIGH: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"\brm\s+(-rf?|-fr|--recursive)\s",
        r"\bdd\s+.*of=/dev/",
        r"\bmkfs",
        r"\bchmod\s+(-R\s+)?777\b",
        r"\bapt(-get)?\s+(remove|purge)\b",
        r"\byum\s+(remove|erase)\b",
        r"\bdnf\s+remove\b",
        r"\bpacman\s+-R",
        r"\biptables\s+-F\b",
        r"\bsystemctl\s+(disable|mask)\b",
        r"\bkill\s+-9\s",
        r"\bpkill\s+-9\b",
        r"\bdocker\s+rm\s+-f",
        r"\bdocker\s+system\s+prune",
        r"\bpct\s+destroy\b",
        r"\bqm\s+destroy\b",
        r"\bzfs\s+destroy\b",
    ])
});

static MEDIUM: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"\bsystemctl\s+(restart|stop|start)\b",
        r"\bservice\s+\S+\s+(restart|stop|start)\b",
        r"\bdocker\s+(restart|stop|start|kill)\b",
        r"\bapt(-get)?\s+(update|upgrade|install)\b",
        r"\byum\s+(update|install)\b",
        r"\bdnf\s+(update|install)\b",
        r"\bpct\s+(start|stop|shutdown|reboot|resize)\b",
        r"\bqm\s+(start|stop|shutdown|reboot|resize)\b",
        r"\bkill\b",
        r"\bpkill\b",
        r"\bchmod\b",
        r"\bchown\b",
        r"\bmv\s",
        r"\bcp\s+-r",
    ])
});

/// Grade a command for the approval prompt.  Medium-risk commands aimed at a
/// node are graded high.
pub fn assess_risk_level(command: &str, target_type: &str) -> RiskLevel {
    if HIGH.iter().any(|re| re.is_match(command)) {
        return RiskLevel::High;
    }
    if MEDIUM.iter().any(|re| re.is_match(command)) {
        return if target_type == "node" {
            RiskLevel::High
        } else {
            RiskLevel::Medium
        };
    }
    RiskLevel::Low
}
