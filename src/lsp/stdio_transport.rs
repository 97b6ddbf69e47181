// stdio wiring: a peer over this process's stdin/stdout, or over a child's pipes
use crate::lsp::peer::{Peer, PeerConfig};
use anyhow::anyhow;
use std::process::Stdio;
use tokio::io::{BufReader, Stdin, Stdout};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

pub type StdioPeer = Peer<BufReader<Stdin>, Stdout>;

pub type ChildPeer = Peer<BufReader<ChildStdout>, ChildStdin>;

/// Peer speaking on this process's stdin/stdout, as a language server does.
///
/// Nothing else may write to stdout while the peer is in use.
pub fn stdio(config: PeerConfig) -> StdioPeer {
    Peer::with_config(
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        config,
    )
}

/// Spawns `exe` and returns a peer connected to its stdin/stdout.
///
/// The child's stderr is inherited. Keep the returned `Child` alive for as
/// long as the peer is used.
pub fn spawn(exe: &str, args: &[&str], config: PeerConfig) -> anyhow::Result<(Child, ChildPeer)> {
    let mut cmd = Command::new(exe);
    for a in args {
        cmd.arg(a);
    }

    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()?;

    let writer = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("failed to take child stdin"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("failed to take child stdout"))?;

    tracing::debug!("Spawned {} (pid {:?})", exe, child.id());
    Ok((child, Peer::with_config(BufReader::new(stdout), writer, config)))
}
