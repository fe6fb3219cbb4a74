use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Result, bail};
use log::debug;
use serde::Serialize;

use crate::config::DestinationCredentials;

/// Create or remove request for the destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
    AddSpace {
        space: String,
        name: String,
    },
    RemoveSpace {
        space: String,
    },
    AddLabels {
        space: String,
        labels: String,
    },
    RemoveLabels {
        space: String,
        labels: String,
    },
    AddPage {
        space: String,
        title: String,
        content: String,
        labels: String,
    },
    RemovePage {
        space: String,
        title: String,
    },
    AddAttachment {
        space: String,
        title: String,
        name: String,
        file: PathBuf,
    },
    RemoveAttachment {
        space: String,
        title: String,
        name: String,
    },
}

impl Request {
    pub fn action(&self) -> &'static str {
        match self {
            Self::AddSpace { .. } => "addSpace",
            Self::RemoveSpace { .. } => "removeSpace",
            Self::AddLabels { .. } => "addLabels",
            Self::RemoveLabels { .. } => "removeLabels",
            Self::AddPage { .. } => "addPage",
            Self::RemovePage { .. } => "removePage",
            Self::AddAttachment { .. } => "addAttachment",
            Self::RemoveAttachment { .. } => "removeAttachment",
        }
    }

    /// `(flag, value)` pairs passed after `--action`.
    pub fn arguments(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::AddSpace { space, name } => {
                vec![("space", space.clone()), ("name", name.clone())]
            }
            Self::RemoveSpace { space } => vec![("space", space.clone())],
            Self::AddLabels { space, labels } | Self::RemoveLabels { space, labels } => {
                vec![("space", space.clone()), ("labels", labels.clone())]
            }
            Self::AddPage {
                space,
                title,
                content,
                labels,
            } => vec![
                ("space", space.clone()),
                ("title", title.clone()),
                ("content", content.clone()),
                ("labels", labels.clone()),
            ],
            Self::RemovePage { space, title } => {
                vec![("space", space.clone()), ("title", title.clone())]
            }
            Self::AddAttachment {
                space,
                title,
                name,
                file,
            } => vec![
                ("space", space.clone()),
                ("title", title.clone()),
                ("name", name.clone()),
                ("file", file.display().to_string()),
            ],
            Self::RemoveAttachment { space, title, name } => vec![
                ("space", space.clone()),
                ("title", title.clone()),
                ("name", name.clone()),
            ],
        }
    }

    /// Short identity for logs; never includes page bodies.
    pub fn describe(&self) -> String {
        match self {
            Self::AddSpace { space, .. } | Self::RemoveSpace { space } => {
                format!("{} {space}", self.action())
            }
            Self::AddLabels { space, labels } | Self::RemoveLabels { space, labels } => {
                format!("{} {space} [{labels}]", self.action())
            }
            Self::AddPage { space, title, .. } | Self::RemovePage { space, title } => {
                format!("{} {space}/{title}", self.action())
            }
            Self::AddAttachment {
                space, title, name, ..
            }
            | Self::RemoveAttachment { space, title, name } => {
                format!("{} {space}/{title}/{name}", self.action())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum SubmitOutcome {
    Success(String),
    /// The destination already holds content under this identity.
    Duplicate(String),
    Failure(String),
}

impl SubmitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

pub trait Submitter {
    fn submit(&mut self, request: &Request) -> SubmitOutcome;
}

/// Runs the Confluence command line client once per request.
pub struct ConfluenceCli {
    command_path: PathBuf,
    server_url: String,
    username: String,
    password: String,
}

impl ConfluenceCli {
    pub fn new(credentials: &DestinationCredentials, server_url: &str) -> Result<Self> {
        let command_path = PathBuf::from(&credentials.command_path);
        if looks_like_path(&command_path) && !command_path.exists() {
            bail!(
                "confluence command not found at {}",
                command_path.display()
            );
        }
        Ok(Self {
            command_path,
            server_url: server_url.trim_end_matches('/').to_string(),
            username: credentials.username.clone(),
            password: credentials.password.clone(),
        })
    }

    fn command(&self, request: &Request) -> Command {
        let mut command = Command::new(&self.command_path);
        command
            .arg("--server")
            .arg(&self.server_url)
            .arg("--user")
            .arg(&self.username)
            .arg("--password")
            .arg(&self.password)
            .arg("--action")
            .arg(request.action());
        for (flag, value) in request.arguments() {
            command.arg(format!("--{flag}")).arg(value);
        }
        command
    }
}

impl Submitter for ConfluenceCli {
    fn submit(&mut self, request: &Request) -> SubmitOutcome {
        debug!("submitting {}", request.describe());
        let output = match self.command(request).output() {
            Ok(output) => output,
            Err(err) => {
                return SubmitOutcome::Failure(format!(
                    "failed to run {}: {err}",
                    self.command_path.display()
                ));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        classify_output(output.status.success(), &stdout, &stderr)
    }
}

/// Map the client's exit status and output to an outcome. Output mentioning
/// an existing item is a duplicate whatever the exit status.
pub fn classify_output(succeeded: bool, stdout: &str, stderr: &str) -> SubmitOutcome {
    let combined = match (stdout.is_empty(), stderr.is_empty()) {
        (false, false) => format!("{stdout}\n{stderr}"),
        (false, true) => stdout.to_string(),
        _ => stderr.to_string(),
    };
    if combined.to_ascii_lowercase().contains("already exists") {
        return SubmitOutcome::Duplicate(combined);
    }
    if succeeded {
        SubmitOutcome::Success(combined)
    } else {
        SubmitOutcome::Failure(combined)
    }
}

fn looks_like_path(path: &Path) -> bool {
    path.components().count() > 1 || path.is_absolute()
}
