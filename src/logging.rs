use tokio::sync::broadcast;
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;

/// Mirrors every formatted log line to stdout and to a broadcast channel
/// that backs the live `/api/logs` stream.
#[derive(Clone)]
pub(crate) struct BroadcastMakeWriter {
    pub sender: broadcast::Sender<String>,
    pub quiet: bool,
}

impl<'a> MakeWriter<'a> for BroadcastMakeWriter {
    type Writer = BroadcastWriter;

    fn make_writer(&'a self) -> Self::Writer {
        BroadcastWriter {
            sender: self.sender.clone(),
            quiet: self.quiet,
        }
    }
}

pub(crate) struct BroadcastWriter {
    sender: broadcast::Sender<String>,
    quiet: bool,
}

impl std::io::Write for BroadcastWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let line = String::from_utf8_lossy(buf).trim_end().to_string();
        if !line.is_empty() {
            // No receivers is fine; nobody is tailing the log.
            let _ = self.sender.send(line);
        }
        if !self.quiet {
            std::io::stdout().write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if !self.quiet {
            std::io::stdout().flush()?;
        }
        Ok(())
    }
}

/// Installs the global subscriber. `quiet` keeps stdout clean for the
/// headless CLI commands, which print their own event output.
pub(crate) fn init(quiet: bool) -> broadcast::Sender<String> {
    let (log_tx, _) = broadcast::channel(256);
    let make_writer = BroadcastMakeWriter {
        sender: log_tx.clone(),
        quiet,
    };
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_writer(make_writer)
        .with_ansi(!quiet)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("tracing subscriber already installed");
    }
    log_tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn writer_broadcasts_trimmed_lines() {
        let (tx, mut rx) = broadcast::channel(4);
        let make = BroadcastMakeWriter {
            sender: tx,
            quiet: true,
        };
        let mut w = make.make_writer();
        w.write_all(b"INFO courier: hello\n").unwrap();
        assert_eq!(rx.try_recv().unwrap(), "INFO courier: hello");
    }

    #[test]
    fn writer_skips_blank_lines() {
        let (tx, mut rx) = broadcast::channel(4);
        let make = BroadcastMakeWriter {
            sender: tx,
            quiet: true,
        };
        let mut w = make.make_writer();
        w.write_all(b"\n").unwrap();
        assert!(rx.try_recv().is_err());
    }
}
