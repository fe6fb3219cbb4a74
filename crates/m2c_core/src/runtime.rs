use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

const EMBEDDED_DEFAULT_CONFIG: &str = include_str!("../../../config/default-config.toml");

pub const STATE_DIR_NAME: &str = ".m2c";
pub const DIAGNOSTIC_LOG_FILENAME: &str = "diagnostics.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub project_root: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        Ok(Self { cwd })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub project_root: PathBuf,
    pub state_dir: PathBuf,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub log_path: PathBuf,
    pub images_dir: PathBuf,
    pub config_path: PathBuf,
    pub root_source: ValueSource,
    pub config_source: ValueSource,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        format!(
            "project_root={} ({})\nstate_dir={}\ndb_path={}\nlog_path={}\nimages_dir={}\nconfig_path={} ({})",
            normalize_for_display(&self.project_root),
            self.root_source.as_str(),
            normalize_for_display(&self.state_dir),
            normalize_for_display(&self.db_path),
            normalize_for_display(&self.log_path),
            normalize_for_display(&self.images_dir),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
        )
    }

    /// Layout rooted at `project_root` with every path at its default location.
    pub fn under(project_root: &Path) -> Self {
        let state_dir = project_root.join(STATE_DIR_NAME);
        let data_dir = state_dir.join("data");
        Self {
            project_root: project_root.to_path_buf(),
            db_path: data_dir.join("m2c.db"),
            log_path: state_dir.join("logs").join(DIAGNOSTIC_LOG_FILENAME),
            images_dir: state_dir.join("images"),
            config_path: state_dir.join("config.toml"),
            data_dir,
            state_dir,
            root_source: ValueSource::Flag,
            config_source: ValueSource::Default,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InitReport {
    pub created_dirs: Vec<PathBuf>,
    pub wrote_config: bool,
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let (project_root, root_source) = if let Some(path) = overrides.project_root.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = non_empty(lookup_env("M2C_PROJECT_ROOT")) {
        (
            absolutize(Path::new(value.trim()), &context.cwd),
            ValueSource::Env,
        )
    } else {
        (context.cwd.clone(), ValueSource::Default)
    };

    let mut resolved = ResolvedPaths::under(&project_root);
    resolved.root_source = root_source;

    if let Some(path) = overrides.config.as_deref() {
        resolved.config_path = absolutize(path, &project_root);
        resolved.config_source = ValueSource::Flag;
    } else if let Some(value) = non_empty(lookup_env("M2C_CONFIG")) {
        resolved.config_path = absolutize(Path::new(value.trim()), &project_root);
        resolved.config_source = ValueSource::Env;
    }

    if let Some(path) = overrides.log_file.as_deref() {
        resolved.log_path = absolutize(path, &project_root);
    }

    Ok(resolved)
}

pub fn init_layout(paths: &ResolvedPaths, force: bool) -> Result<InitReport> {
    let mut created_dirs = Vec::new();
    let required_dirs = [
        paths.state_dir.clone(),
        paths.data_dir.clone(),
        paths.images_dir.clone(),
        paths.state_dir.join("logs"),
    ];

    for dir in &required_dirs {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            created_dirs.push(dir.clone());
        }
    }

    let wrote_config = write_text_file(&paths.config_path, EMBEDDED_DEFAULT_CONFIG, force)?;

    Ok(InitReport {
        created_dirs,
        wrote_config,
    })
}

pub fn embedded_default_config() -> &'static str {
    EMBEDDED_DEFAULT_CONFIG
}

pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create parent directory {}", parent.display()))
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn write_text_file(path: &Path, content: &str, force: bool) -> Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }
    ensure_parent_dir(path)?;
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;

    use tempfile::tempdir;

    use super::{PathOverrides, ResolutionContext, ValueSource, init_layout, resolve_paths_with_lookup};

    #[test]
    fn resolve_paths_prefers_flag_over_env() {
        let temp = tempdir().expect("tempdir");
        let cwd = temp.path().join("cwd");
        let from_flag = temp.path().join("flag-root");
        fs::create_dir_all(&cwd).expect("create cwd");

        let overrides = PathOverrides {
            project_root: Some(from_flag.clone()),
            ..PathOverrides::default()
        };
        let context = ResolutionContext { cwd };
        let env = HashMap::from([(
            "M2C_PROJECT_ROOT".to_string(),
            temp.path().join("env-root").to_string_lossy().to_string(),
        )]);

        let resolved = resolve_paths_with_lookup(&context, &overrides, |key| env.get(key).cloned())
            .expect("resolve paths");
        assert_eq!(resolved.project_root, from_flag);
        assert_eq!(resolved.root_source, ValueSource::Flag);
        assert!(resolved.db_path.starts_with(from_flag.join(".m2c")));
    }

    #[test]
    fn resolve_paths_uses_env_config_relative_to_root() {
        let temp = tempdir().expect("tempdir");
        let context = ResolutionContext {
            cwd: temp.path().to_path_buf(),
        };
        let env = HashMap::from([("M2C_CONFIG".to_string(), "custom.toml".to_string())]);

        let resolved =
            resolve_paths_with_lookup(&context, &PathOverrides::default(), |key| {
                env.get(key).cloned()
            })
            .expect("resolve paths");
        assert_eq!(resolved.root_source, ValueSource::Default);
        assert_eq!(resolved.config_source, ValueSource::Env);
        assert_eq!(resolved.config_path, temp.path().join("custom.toml"));
    }

    #[test]
    fn init_layout_creates_dirs_and_keeps_existing_config() {
        let temp = tempdir().expect("tempdir");
        let context = ResolutionContext {
            cwd: temp.path().to_path_buf(),
        };
        let paths =
            resolve_paths_with_lookup(&context, &PathOverrides::default(), |_| None).expect("resolve");

        let first = init_layout(&paths, false).expect("init");
        assert!(first.wrote_config);
        assert!(!first.created_dirs.is_empty());
        assert!(paths.images_dir.exists());
        assert!(paths.data_dir.exists());

        fs::write(&paths.config_path, "[source]\n").expect("overwrite config");
        let second = init_layout(&paths, false).expect("second init");
        assert!(!second.wrote_config);
        assert!(second.created_dirs.is_empty());
        assert_eq!(
            fs::read_to_string(&paths.config_path).expect("read config"),
            "[source]\n"
        );
    }
}
