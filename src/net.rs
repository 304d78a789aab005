use std::future::Future;
use std::time::Duration;
use tokio::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}")]
    Failed { program: String, status: std::process::ExitStatus },
    #[error("unrecognised {0} output")]
    Unparsable(String),
    #[error("{program} did not answer within {}ms", .after.as_millis())]
    Timeout { program: String, after: Duration },
}

/// Counts established TCP connections whose local end is `port`.
pub trait ConnectionCounter {
    fn count_established(&self, port: u16) -> impl Future<Output = Result<usize, NetError>> + Send;
}

/// Count `ESTABLISHED` rows of `netstat -tn` output whose local address ends in `:port`.
pub fn count_in_netstat(output: &str, port: u16) -> Option<usize> {
    let mut lines = output.lines();
    lines.find(|line| line.trim_start().starts_with("Proto"))?;

    let suffix = port.to_string();
    let count = lines
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 6 || !fields[0].starts_with("tcp") {
                return None;
            }
            Some((fields[3], fields[5]))
        })
        .filter(|(local, state)| {
            *state == "ESTABLISHED"
                && local
                    .rsplit_once(':')
                    .is_some_and(|(_, p)| p == suffix)
        })
        .count();
    Some(count)
}

/// Shells out to `netstat`. A run that outlives `timeout` is killed and
/// reported as [`NetError::Timeout`].
#[derive(Debug, Clone)]
pub struct NetstatCounter {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl NetstatCounter {
    pub fn new(timeout: Duration) -> Self {
        Self::with_command("netstat", ["-tn"], timeout)
    }

    pub fn with_command(
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
        timeout: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            timeout,
        }
    }
}

impl ConnectionCounter for NetstatCounter {
    async fn count_established(&self, port: u16) -> Result<usize, NetError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| NetError::Timeout {
                program: self.program.clone(),
                after: self.timeout,
            })?
            .map_err(|source| NetError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(NetError::Failed {
                program: self.program.clone(),
                status: output.status,
            });
        }

        let text = String::from_utf8_lossy(&output.stdout);
        count_in_netstat(&text, port).ok_or_else(|| NetError::Unparsable(self.program.clone()))
    }
}
