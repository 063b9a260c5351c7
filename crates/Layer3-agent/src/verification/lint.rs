//! Lint - 저장 전 코드의 위험 패턴 검사
//!
//! 규칙은 줄 단위 정규식이다. `#` 로 시작하는 주석 줄은 검사하지 않는다.
//! 경로 리터럴을 확인할 수 있는 규칙은 허용된 루트 (`/tmp`, `/workspace`)
//! 아래의 경로를 통과시킨다.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

macro_rules! lint_regex {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pattern).expect("lint pattern is a valid regex"))
        }
    };
}

// ============================================================
// Patterns
// ============================================================

lint_regex!(rmtree_re, r#"\brmtree\s*\(\s*(?:[rRbB]?['"]([^'"]*)['"])?"#);
lint_regex!(
    os_remove_re,
    r#"\bos\.(?:remove|unlink|rmdir|removedirs)\s*\(\s*[rRbB]?['"]([^'"]*)['"]"#
);
lint_regex!(
    path_unlink_re,
    r#"\bPath\s*\(\s*[rRbB]?['"]([^'"]*)['"]\s*\)\s*\.\s*(?:unlink|rmdir)\s*\("#
);
lint_regex!(
    rm_rf_re,
    r#"\brm\s+-[A-Za-z]*(?:rf|fr)|['"]rm['"]\s*,\s*['"]-[A-Za-z]*(?:rf|fr)"#
);

lint_regex!(
    open_write_re,
    r#"\bopen\s*\(\s*[rRbB]?['"]([^'"]*)['"]\s*,\s*(?:mode\s*=\s*)?[rRbB]?['"]([^'"]*)['"]"#
);
lint_regex!(
    write_path_re,
    r#"[rRbB]?['"]([^'"]*)['"]\s*\)\s*\.\s*write_(?:text|bytes)\s*\("#
);

lint_regex!(
    os_spawn_re,
    r"\bos\.(?:system|popen|exec[lv]p?e?|spawn[lv]p?e?|posix_spawnp?)\s*\("
);
lint_regex!(shell_true_re, r"\bshell\s*=\s*True\b");
lint_regex!(pty_spawn_re, r"\bpty\.spawn\s*\(");

lint_regex!(chmod_re, r#"\bos\.(?:chmod|chown|lchown)\s*\(\s*[rRbB]?['"]/"#);
lint_regex!(shutil_chown_re, r"\bshutil\.chown\s*\(");
lint_regex!(setuid_re, r"\bos\.set(?:e|re|res)?[ug]id\s*\(");
lint_regex!(
    power_re,
    r#"['"]\s*(?:sudo\s+)?(?:shutdown|reboot|poweroff|halt|init\s+0)\b"#
);
lint_regex!(shell_chmod_re, r#"['"]\s*(?:sudo\s+)?ch(?:mod|own)\s+\S+\s+/"#);

lint_regex!(eval_re, r"(?:^|[^\w.])(eval|exec)\s*\(");
lint_regex!(dunder_import_re, r"\b__import__\s*\(");

lint_regex!(
    credential_re,
    r"\.ssh(?:/|\b)|\bid_(?:rsa|dsa|ecdsa|ed25519)\b|/etc/(?:shadow|passwd|sudoers)\b|\.aws/credentials|\.netrc\b"
);

// ============================================================
// LintRule
// ============================================================

/// A pluggable check. Each variant carries its own parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum LintRule {
    /// Recursive or single-file deletion outside the allowed roots, `rm -rf`
    DestructiveFilesystem { allowed_roots: Vec<String> },
    /// File writes to absolute paths outside the allowed roots
    WriteOutsideSandbox { allowed_roots: Vec<String> },
    ProcessSpawn,
    SystemModification,
    DynamicEvaluation,
    CredentialAccess,
}

impl LintRule {
    pub fn name(&self) -> &'static str {
        match self {
            LintRule::DestructiveFilesystem { .. } => "destructive_filesystem",
            LintRule::WriteOutsideSandbox { .. } => "write_outside_sandbox",
            LintRule::ProcessSpawn => "process_spawn",
            LintRule::SystemModification => "system_modification",
            LintRule::DynamicEvaluation => "dynamic_evaluation",
            LintRule::CredentialAccess => "credential_access",
        }
    }

    /// Reason the line violates this rule, if it does
    pub fn check_line(&self, line: &str) -> Option<String> {
        match self {
            LintRule::DestructiveFilesystem { allowed_roots } => {
                destructive(line, allowed_roots)
            }
            LintRule::WriteOutsideSandbox { allowed_roots } => {
                write_outside(line, allowed_roots)
            }
            LintRule::ProcessSpawn => {
                if os_spawn_re().is_match(line) || pty_spawn_re().is_match(line) {
                    Some("spawns a process".to_string())
                } else if shell_true_re().is_match(line) {
                    Some("runs a command through the shell (shell=True)".to_string())
                } else {
                    None
                }
            }
            LintRule::SystemModification => {
                if chmod_re().is_match(line)
                    || shutil_chown_re().is_match(line)
                    || shell_chmod_re().is_match(line)
                {
                    Some("changes permissions or ownership of system paths".to_string())
                } else if setuid_re().is_match(line) {
                    Some("changes the process user or group".to_string())
                } else if power_re().is_match(line) {
                    Some("shuts down or reboots the host".to_string())
                } else {
                    None
                }
            }
            LintRule::DynamicEvaluation => {
                if let Some(caps) = eval_re().captures(line) {
                    let func = caps.get(1).map(|m| m.as_str()).unwrap_or("eval");
                    Some(format!("evaluates dynamic code with {}()", func))
                } else if dunder_import_re().is_match(line) {
                    Some("imports modules dynamically with __import__()".to_string())
                } else {
                    None
                }
            }
            LintRule::CredentialAccess => credential_re()
                .find(line)
                .map(|m| format!("accesses credentials ({})", m.as_str())),
        }
    }
}

/// `path` is exactly a root or below one, without `..` segments
pub fn is_under_allowed_root(path: &str, allowed_roots: &[String]) -> bool {
    if path.split('/').any(|segment| segment == "..") {
        return false;
    }
    allowed_roots.iter().any(|root| {
        let root = root.trim_end_matches('/');
        !root.is_empty()
            && (path == root || path.strip_prefix(root).is_some_and(|rest| rest.starts_with('/')))
    })
}

fn outside_roots(path: &str, allowed_roots: &[String]) -> bool {
    (path.starts_with('/') || path.starts_with('~') || path.contains(".."))
        && !is_under_allowed_root(path, allowed_roots)
}

fn destructive(line: &str, allowed_roots: &[String]) -> Option<String> {
    if rm_rf_re().is_match(line) {
        return Some("runs rm -rf".to_string());
    }

    if let Some(caps) = rmtree_re().captures(line) {
        return match caps.get(1).map(|m| m.as_str()) {
            Some(path) if is_under_allowed_root(path, allowed_roots) => None,
            Some(path) => Some(format!("recursively deletes {}", path)),
            None => Some("recursively deletes a computed path".to_string()),
        };
    }

    [os_remove_re(), path_unlink_re()].iter().find_map(|re| {
        let caps = re.captures(line)?;
        let path = caps.get(1)?.as_str();
        outside_roots(path, allowed_roots).then(|| format!("deletes {}", path))
    })
}

fn write_outside(line: &str, allowed_roots: &[String]) -> Option<String> {
    if let Some(caps) = open_write_re().captures(line) {
        let path = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let mode = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        let writes = mode.contains(['w', 'a', 'x', '+']);
        if writes && outside_roots(path, allowed_roots) {
            return Some(format!("writes to {} (mode '{}')", path, mode));
        }
    }

    let caps = write_path_re().captures(line)?;
    let path = caps.get(1)?.as_str();
    outside_roots(path, allowed_roots).then(|| format!("writes to {}", path))
}

// ============================================================
// LintPolicy
// ============================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintViolation {
    pub rule: String,
    /// 1-based
    pub line: usize,
    pub snippet: String,
    pub reason: String,
}

impl std::fmt::Display for LintViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "line {} [{}]: {} `{}`",
            self.line, self.rule, self.reason, self.snippet
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintPolicy {
    rules: Vec<LintRule>,
}

impl LintPolicy {
    pub fn new(rules: Vec<LintRule>) -> Self {
        Self { rules }
    }

    /// Every built-in rule with the given write boundary
    pub fn with_allowed_roots(allowed_roots: Vec<String>) -> Self {
        Self::new(vec![
            LintRule::DestructiveFilesystem {
                allowed_roots: allowed_roots.clone(),
            },
            LintRule::WriteOutsideSandbox { allowed_roots },
            LintRule::ProcessSpawn,
            LintRule::SystemModification,
            LintRule::DynamicEvaluation,
            LintRule::CredentialAccess,
        ])
    }

    pub fn rules(&self) -> &[LintRule] {
        &self.rules
    }

    pub fn check(&self, code: &str) -> Vec<LintViolation> {
        let mut violations = Vec::new();

        for (idx, line) in code.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            for rule in &self.rules {
                if let Some(reason) = rule.check_line(line) {
                    violations.push(LintViolation {
                        rule: rule.name().to_string(),
                        line: idx + 1,
                        snippet: trimmed.chars().take(120).collect(),
                        reason,
                    });
                }
            }
        }

        violations
    }
}

impl Default for LintPolicy {
    fn default() -> Self {
        Self::with_allowed_roots(vec!["/tmp".to_string(), "/workspace".to_string()])
    }
}

/// Refine feedback listing every violation
pub fn lint_feedback(violations: &[LintViolation]) -> String {
    let mut feedback = String::from("The code violates the sandbox policy:\n");
    for violation in violations {
        feedback.push_str(&format!("- {}\n", violation));
    }
    feedback
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules_hit(code: &str) -> Vec<String> {
        LintPolicy::default()
            .check(code)
            .into_iter()
            .map(|v| v.rule)
            .collect()
    }

    #[test]
    fn test_clean_code_passes() {
        let code = "import math\nresult = math.pi\nprint(f'{result:.5f}')\n";
        assert!(LintPolicy::default().check(code).is_empty());
    }

    #[test]
    fn test_destructive_filesystem() {
        assert_eq!(rules_hit("shutil.rmtree('/home/user')"), vec!["destructive_filesystem"]);
        assert_eq!(rules_hit("shutil.rmtree(path)"), vec!["destructive_filesystem"]);
        assert!(rules_hit("shutil.rmtree('/tmp/build')").is_empty());
        assert_eq!(rules_hit("os.remove('/etc/hosts')"), vec!["destructive_filesystem"]);
        assert_eq!(rules_hit("os.unlink('~/notes.txt')"), vec!["destructive_filesystem"]);
        assert!(rules_hit("os.remove('out.png')").is_empty());
        assert!(rules_hit("os.remove('/workspace/out.png')").is_empty());
        assert_eq!(
            rules_hit("subprocess.run(['rm', '-rf', 'data'])"),
            vec!["destructive_filesystem"]
        );
    }

    #[test]
    fn test_write_outside_sandbox() {
        let violations = LintPolicy::default().check("with open('/etc/cron.d/job', 'w') as f:\n    f.write('x')");
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].rule, "write_outside_sandbox");
        assert_eq!(violations[0].line, 1);

        assert!(rules_hit("open('/tmp/out.csv', 'w')").is_empty());
        assert!(rules_hit("open('/etc/hostname', 'r')").is_empty());
        assert!(rules_hit("open('report.txt', mode='a')").is_empty());
        assert_eq!(rules_hit("Path('/usr/local/x').write_text('hi')"), vec!["write_outside_sandbox"]);
        assert_eq!(rules_hit("open('/tmp/../etc/x', 'w')"), vec!["write_outside_sandbox"]);
    }

    #[test]
    fn test_root_prefix_must_be_a_directory() {
        let roots = vec!["/tmp".to_string()];
        assert!(is_under_allowed_root("/tmp", &roots));
        assert!(is_under_allowed_root("/tmp/a/b", &roots));
        assert!(!is_under_allowed_root("/tmpfoo/a", &roots));
        assert!(!is_under_allowed_root("/tmp/../root", &roots));
    }

    #[test]
    fn test_process_spawn() {
        assert_eq!(rules_hit("os.system('ls')"), vec!["process_spawn"]);
        assert_eq!(rules_hit("subprocess.run(cmd, shell=True)"), vec!["process_spawn"]);
        assert!(rules_hit("subprocess.run(['ls', '-l'])").is_empty());
    }

    #[test]
    fn test_system_modification() {
        assert_eq!(rules_hit("os.chmod('/usr/bin/python', 0o777)"), vec!["system_modification"]);
        assert_eq!(rules_hit("os.setuid(0)"), vec!["system_modification"]);
        assert!(rules_hit("os.chmod('script.sh', 0o755)").is_empty());
    }

    #[test]
    fn test_dynamic_evaluation() {
        assert_eq!(rules_hit("value = eval(user_input)"), vec!["dynamic_evaluation"]);
        assert_eq!(rules_hit("exec(code)"), vec!["dynamic_evaluation"]);
        assert_eq!(rules_hit("mod = __import__('os')"), vec!["dynamic_evaluation"]);
        assert!(rules_hit("model.eval()").is_empty());
        assert!(rules_hit("retrieval(x)").is_empty());
    }

    #[test]
    fn test_credential_access() {
        assert_eq!(rules_hit("open('/etc/shadow').read()"), vec!["credential_access"]);
        assert_eq!(
            rules_hit("key = Path.home() / '.ssh' / 'id_rsa'"),
            vec!["credential_access"]
        );
    }

    #[test]
    fn test_comment_lines_skipped() {
        assert!(rules_hit("# os.system('rm -rf /')").is_empty());
    }

    #[test]
    fn test_custom_rule_set() {
        let policy = LintPolicy::new(vec![LintRule::DynamicEvaluation]);
        assert!(policy.check("os.system('ls')").is_empty());
        assert_eq!(policy.check("eval('1')").len(), 1);
    }

    #[test]
    fn test_feedback_lists_violations() {
        let violations = LintPolicy::default().check("os.system('ls')\neval('x')");
        let feedback = lint_feedback(&violations);
        assert!(feedback.contains("line 1 [process_spawn]"));
        assert!(feedback.contains("line 2 [dynamic_evaluation]"));
    }
}
