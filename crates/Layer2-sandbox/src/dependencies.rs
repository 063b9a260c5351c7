//! Dependency detection and installation
//!
//! Imports are scanned with a line-anchored regex and mapped to installable
//! package names. Only imports with a known mapping and explicitly declared
//! packages are installed; anything else is assumed to ship with the
//! interpreter.

use parking_lot::Mutex;
use regex::Regex;
use skillforge_foundation::{Error, Result};
use std::collections::{BTreeSet, HashSet};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Import name → package name
const PACKAGE_MAP: &[(&str, &str)] = &[
    ("numpy", "numpy"),
    ("pandas", "pandas"),
    ("matplotlib", "matplotlib"),
    ("scipy", "scipy"),
    ("sympy", "sympy"),
    ("sklearn", "scikit-learn"),
    ("cv2", "opencv-python"),
    ("PIL", "pillow"),
    ("requests", "requests"),
    ("httpx", "httpx"),
    ("boto3", "boto3"),
    ("google", "google-api-python-client"),
    ("googleapiclient", "google-api-python-client"),
    ("psycopg2", "psycopg2-binary"),
    ("pymongo", "pymongo"),
    ("redis", "redis"),
    ("sqlalchemy", "sqlalchemy"),
    ("bs4", "beautifulsoup4"),
    ("duckduckgo_search", "duckduckgo-search"),
    ("ddgs", "duckduckgo-search"),
    ("trafilatura", "trafilatura"),
    ("wikipedia", "wikipedia"),
    ("playwright", "playwright"),
    ("psutil", "psutil"),
    ("yaml", "pyyaml"),
    ("yfinance", "yfinance"),
    ("tavily", "tavily-python"),
    ("tabulate", "tabulate"),
];

/// Default timeout for one install command
const INSTALL_TIMEOUT: Duration = Duration::from_secs(300);

/// A package to make available before running code
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Dependency {
    /// Name used in `import`
    pub module: String,
    /// Name passed to the installer
    pub package: String,
}

impl Dependency {
    /// Declared package; the import name is guessed from the package name
    pub fn declared(package: &str) -> Self {
        let package = package.trim().to_string();
        let module = PACKAGE_MAP
            .iter()
            .find(|(_, pkg)| *pkg == package)
            .map(|(module, _)| module.to_string())
            .unwrap_or_else(|| package.replace('-', "_"));
        Self { module, package }
    }
}

fn import_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*(?:from\s+([A-Za-z_][A-Za-z0-9_]*)|import\s+([A-Za-z_][A-Za-z0-9_]*))")
            .expect("import pattern is a valid regex")
    })
}

/// Top-level module names imported by `code`, in first-seen order
pub fn detect_imports(code: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    import_regex()
        .captures_iter(code)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| m.as_str().to_string())
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

/// Package for an import name, if it has a known mapping
pub fn package_for_import(module: &str) -> Option<&'static str> {
    PACKAGE_MAP
        .iter()
        .find(|(m, _)| *m == module)
        .map(|(_, pkg)| *pkg)
}

/// Detected imports plus declared packages, deduplicated by package name
pub fn resolve_dependencies(code: &str, declared: &[String]) -> Vec<Dependency> {
    let mut by_package = BTreeSet::new();
    let mut resolved = Vec::new();

    for module in detect_imports(code) {
        match package_for_import(&module) {
            Some(package) => {
                if by_package.insert(package.to_string()) {
                    resolved.push(Dependency {
                        module,
                        package: package.to_string(),
                    });
                }
            }
            None => debug!("No package mapping for import '{}'", module),
        }
    }

    for name in declared.iter().filter(|d| !d.trim().is_empty()) {
        let dep = Dependency::declared(name);
        if by_package.insert(dep.package.clone()) {
            resolved.push(dep);
        }
    }

    resolved
}

// ============================================================================
// DependencyInstaller
// ============================================================================

/// Installs missing packages into the interpreter used by the process sandbox
///
/// Packages known to be present are remembered so repeated invocations skip
/// the import check. The set is never locked across a subprocess call.
pub struct DependencyInstaller {
    python: String,
    present: Mutex<HashSet<String>>,
    install_timeout: Duration,
}

impl DependencyInstaller {
    pub fn new(python: impl Into<String>) -> Self {
        Self {
            python: python.into(),
            present: Mutex::new(HashSet::new()),
            install_timeout: INSTALL_TIMEOUT,
        }
    }

    pub fn with_install_timeout(mut self, timeout: Duration) -> Self {
        self.install_timeout = timeout;
        self
    }

    /// Packages already confirmed present
    pub fn known_present(&self) -> Vec<String> {
        let mut present: Vec<String> = self.present.lock().iter().cloned().collect();
        present.sort();
        present
    }

    /// Make every dependency importable, installing what is missing
    pub async fn ensure(&self, deps: &[Dependency], cancel: &CancellationToken) -> Result<()> {
        let unknown: Vec<Dependency> = {
            let present = self.present.lock();
            deps.iter()
                .filter(|d| !present.contains(&d.package))
                .cloned()
                .collect()
        };
        if unknown.is_empty() {
            return Ok(());
        }

        let missing = self.find_missing(&unknown).await?;
        let already: Vec<String> = unknown
            .iter()
            .filter(|d| !missing.contains(d))
            .map(|d| d.package.clone())
            .collect();
        self.present.lock().extend(already);

        if missing.is_empty() {
            return Ok(());
        }

        let packages: Vec<String> = missing.iter().map(|d| d.package.clone()).collect();
        info!("Installing missing packages: {}", packages.join(", "));

        let mut cmd = self.install_command(&packages);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::select! {
            result = tokio::time::timeout(self.install_timeout, cmd.output()) => {
                result
                    .map_err(|_| Error::SandboxRuntime(format!(
                        "installing {} timed out", packages.join(", ")
                    )))?
                    .map_err(|e| Error::SandboxRuntime(format!("failed to run installer: {}", e)))?
            }
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("Package install failed: {}", stderr.trim());
            return Err(Error::SandboxRuntime(format!(
                "failed to install {}: {}",
                packages.join(", "),
                stderr.trim()
            )));
        }

        self.present.lock().extend(packages);
        Ok(())
    }

    /// Dependencies whose module cannot be found by the interpreter
    async fn find_missing(&self, deps: &[Dependency]) -> Result<Vec<Dependency>> {
        let script = "import importlib.util, sys\n\
                      for name in sys.argv[1:]:\n    \
                      if importlib.util.find_spec(name) is None:\n        \
                      print(name)\n";
        let output = Command::new(&self.python)
            .arg("-c")
            .arg(script)
            .args(deps.iter().map(|d| d.module.as_str()))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                Error::SandboxUnavailable(format!("cannot start {}: {}", self.python, e))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let missing: HashSet<&str> = stdout.lines().map(str::trim).collect();
        Ok(deps
            .iter()
            .filter(|d| missing.contains(d.module.as_str()))
            .cloned()
            .collect())
    }

    fn install_command(&self, packages: &[String]) -> Command {
        match which::which("uv") {
            Ok(uv) => {
                let mut cmd = Command::new(uv);
                cmd.args(["pip", "install", "--python", &self.python]);
                cmd.args(packages);
                cmd
            }
            Err(_) => {
                let mut cmd = Command::new(&self.python);
                cmd.args(["-m", "pip", "install", "--quiet"]);
                cmd.args(packages);
                cmd
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_imports() {
        let code = "import os\nimport numpy as np\nfrom bs4 import BeautifulSoup\n    import cv2\nx = 'import fake'\n";
        assert_eq!(detect_imports(code), vec!["os", "numpy", "bs4", "cv2"]);
    }

    #[test]
    fn test_resolve_maps_and_dedupes() {
        let code = "import cv2\nfrom PIL import Image\nimport json\n";
        let deps = resolve_dependencies(code, &["pillow".into(), "rich".into(), " ".into()]);
        let packages: Vec<&str> = deps.iter().map(|d| d.package.as_str()).collect();
        assert_eq!(packages, vec!["opencv-python", "pillow", "rich"]);
        assert_eq!(deps[1].module, "PIL");
    }

    #[test]
    fn test_declared_guesses_module() {
        assert_eq!(Dependency::declared("scikit-learn").module, "sklearn");
        assert_eq!(Dependency::declared("python-dateutil").module, "python_dateutil");
    }

    #[test]
    fn test_stdlib_imports_are_not_installed() {
        let deps = resolve_dependencies("import math\nimport itertools\n", &[]);
        assert!(deps.is_empty());
    }

    #[tokio::test]
    async fn test_ensure_with_nothing_to_do() {
        let installer = DependencyInstaller::new("python3-does-not-exist");
        let cancel = CancellationToken::new();
        assert!(installer.ensure(&[], &cancel).await.is_ok());
    }

    #[tokio::test]
    async fn test_ensure_reports_missing_interpreter() {
        let installer = DependencyInstaller::new("python3-does-not-exist");
        let cancel = CancellationToken::new();
        let deps = resolve_dependencies("import numpy\n", &[]);
        let err = installer.ensure(&deps, &cancel).await.unwrap_err();
        assert!(matches!(err, Error::SandboxUnavailable(_)));
    }
}
