//! Command transports

use crate::config::SshSpec;
use crate::error::{KeelError, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Exit status ssh uses for its own failures
const SSH_ERROR_STATUS: i32 = 255;

/// Quote `s` for a POSIX shell
pub fn quote(s: &str) -> String {
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[derive(Debug, Clone)]
enum Transport {
    Local,
    Ssh {
        destination: String,
        port: u16,
        key_path: Option<PathBuf>,
        control_path: PathBuf,
    },
}

/// Runs shell commands on one host, either locally or over the system ssh
/// client with a shared control connection
#[derive(Debug, Clone)]
pub struct Runner {
    transport: Transport,
    sudo: bool,
}

impl Runner {
    pub fn local() -> Self {
        Self {
            transport: Transport::Local,
            sudo: false,
        }
    }

    /// Runner for `spec`; control sockets live in `control_dir`
    pub fn ssh(spec: &SshSpec, control_dir: &Path) -> Self {
        Self {
            transport: Transport::Ssh {
                destination: format!("{}@{}", spec.user, spec.address),
                port: spec.port,
                key_path: spec.key_path.clone(),
                control_path: control_dir.join(format!("{}-{}.sock", spec.address, spec.port)),
            },
            sudo: spec.user != "root",
        }
    }

    /// Common ssh options, without the destination
    fn ssh_args(&self) -> Vec<String> {
        let Transport::Ssh {
            port,
            ref key_path,
            ref control_path,
            ..
        } = self.transport
        else {
            return Vec::new();
        };

        let mut args = vec![
            "-p".to_string(),
            port.to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            "ControlMaster=auto".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", control_path.display()),
            "-o".to_string(),
            "ControlPersist=600".to_string(),
        ];
        if let Some(key) = key_path {
            args.push("-i".to_string());
            args.push(key.display().to_string());
        }
        args
    }

    fn command(&self, cmd: &str) -> Command {
        let cmd = if self.sudo {
            format!("sudo -n sh -c {}", quote(cmd))
        } else {
            cmd.to_string()
        };

        match self.transport {
            Transport::Local => {
                let mut c = Command::new("sh");
                c.arg("-c").arg(cmd);
                c
            }
            Transport::Ssh {
                ref destination, ..
            } => {
                let mut c = Command::new("ssh");
                c.args(self.ssh_args()).arg(destination).arg("--").arg(cmd);
                c
            }
        }
    }

    fn is_ssh(&self) -> bool {
        matches!(self.transport, Transport::Ssh { .. })
    }

    /// Run `cmd` and return its stdout
    pub async fn run(&self, cmd: &str) -> Result<String> {
        self.run_with_input(cmd, None).await
    }

    /// Run `cmd` feeding `input` on stdin, and return its stdout
    pub async fn run_with_input(&self, cmd: &str, input: Option<&str>) -> Result<String> {
        tracing::debug!("running: {}", cmd);

        let mut command = self.command(cmd);
        command
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            KeelError::Connection(format!("failed to start {}: {}", self.program(), e))
        })?;

        // stdin is fed while stdout and stderr drain, so neither side can
        // block on a full pipe
        let stdin = child.stdin.take();
        let feed = async move {
            if let (Some(mut stdin), Some(input)) = (stdin, input) {
                stdin.write_all(input.as_bytes()).await?;
                stdin.shutdown().await?;
            }
            Ok::<_, std::io::Error>(())
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;
        if let Err(e) = fed {
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                return Err(e.into());
            }
        }
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let code = output.status.code().unwrap_or(-1);
            if self.is_ssh() && code == SSH_ERROR_STATUS {
                return Err(KeelError::Connection(stderr));
            }
            return Err(KeelError::Command(format!(
                "`{}` exited with {}: {}",
                cmd, code, stderr
            )));
        }

        Ok(stdout)
    }

    fn program(&self) -> &'static str {
        match self.transport {
            Transport::Local => "sh",
            Transport::Ssh { .. } => "ssh",
        }
    }

    /// Open the session; for ssh this starts the control master
    pub async fn open(&self) -> Result<()> {
        if let Transport::Ssh {
            ref control_path, ..
        } = self.transport
        {
            if let Some(dir) = control_path.parent() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }
        self.run("true").await.map(|_| ())
    }

    /// Close the session; for ssh this stops the control master
    pub async fn close(&self) -> Result<()> {
        let Transport::Ssh {
            ref destination, ..
        } = self.transport
        else {
            return Ok(());
        };

        let output = Command::new("ssh")
            .args(self.ssh_args())
            .args(["-O", "exit"])
            .arg(destination)
            .stdin(Stdio::null())
            .output()
            .await?;
        if !output.status.success() {
            tracing::debug!(
                "{}: {}",
                destination,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}
