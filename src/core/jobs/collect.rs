//! Builds style datasets from the user's own sent messages and emails.
//!
//! Each dataset is a JSONL file of `{instruction, output}` pairs, where the
//! output is always something the user wrote. Runs on a job worker thread.

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use super::LogSink;
use crate::connectors::messages::{COCOA_EPOCH_OFFSET, MessageConnector};

const SECONDS_PER_MONTH: i64 = 30 * 24 * 3600;
const MIN_MESSAGE_CHARS: usize = 3;
const MIN_SUBJECT_CHARS: usize = 2;
const MIN_EMAIL_BODY_CHARS: usize = 10;
const MAIL_TIMEOUT: Duration = Duration::from_secs(120);
const BLOCK_MARKER: &str = "---EMAIL---";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub instruction: String,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ChatLine {
    pub chat_id: i64,
    pub text: String,
    pub is_from_me: bool,
}

/// Cocoa-nanosecond timestamp for `months` back from `now_unix`.
pub(crate) fn cocoa_cutoff(now_unix: i64, months: u32) -> i64 {
    let cutoff = now_unix - i64::from(months) * SECONDS_PER_MONTH;
    (cutoff - COCOA_EPOCH_OFFSET).saturating_mul(1_000_000_000)
}

/// Messages newer than `cutoff`, grouped by chat and oldest first.
pub(crate) fn query_chat_lines(conn: &Connection, cutoff: i64) -> rusqlite::Result<Vec<ChatLine>> {
    let mut stmt = conn.prepare(
        "SELECT cmj.chat_id, m.text, m.is_from_me
         FROM message m
         JOIN chat_message_join cmj ON cmj.message_id = m.ROWID
         WHERE m.text IS NOT NULL AND m.text != '' AND m.date > ?1
         ORDER BY cmj.chat_id, m.date ASC",
    )?;
    let rows = stmt.query_map(params![cutoff], |row| {
        Ok(ChatLine {
            chat_id: row.get(0)?,
            text: row.get(1)?,
            is_from_me: row.get::<_, i64>(2)? != 0,
        })
    })?;
    rows.collect()
}

/// Pairs every sent message with the closest earlier received message in
/// the same chat. Pairs where either side is under three characters are
/// dropped.
pub(crate) fn pair_replies(lines: &[ChatLine]) -> Vec<Sample> {
    let mut samples = Vec::new();
    for (i, mine) in lines.iter().enumerate() {
        if !mine.is_from_me {
            continue;
        }
        let theirs = lines[..i]
            .iter()
            .rev()
            .take_while(|l| l.chat_id == mine.chat_id)
            .find(|l| !l.is_from_me);
        let Some(theirs) = theirs else {
            continue;
        };
        let their_text = theirs.text.trim();
        let my_text = mine.text.trim();
        if their_text.chars().count() < MIN_MESSAGE_CHARS
            || my_text.chars().count() < MIN_MESSAGE_CHARS
        {
            continue;
        }
        samples.push(Sample {
            instruction: format!("Reply to this iMessage: \"{their_text}\""),
            output: my_text.to_string(),
        });
    }
    samples
}

fn sent_mail_script(limit: usize) -> String {
    format!(
        r#"tell application "Mail"
    set output to ""
    set collected to 0
    try
        repeat with acct in every account
            try
                repeat with mb in every mailbox of acct
                    set mbName to name of mb as string
                    if mbName is "Sent" or mbName is "Sent Mail" or mbName is "Sent Messages" or mbName is "[Gmail]/Sent Mail" then
                        set allMsgs to messages of mb
                        set msgCount to count of allMsgs
                        if msgCount > {limit} then set msgCount to {limit}
                        if msgCount > 0 then
                            repeat with msg in items 1 thru msgCount of allMsgs
                                if collected >= {limit} then exit repeat
                                try
                                    set msgSubject to subject of msg as string
                                    set msgBody to (content of msg) as string
                                    if (length of msgBody) > 2000 then
                                        set msgBody to (text 1 thru 2000 of msgBody)
                                    end if
                                    set output to output & "{BLOCK_MARKER}" & return
                                    set output to output & "subject:" & msgSubject & return
                                    set output to output & "body:" & msgBody & return
                                    set collected to collected + 1
                                end try
                            end repeat
                        end if
                        exit repeat
                    end if
                end repeat
            end try
        end repeat
    on error errMsg
        set output to "ERROR:" & errMsg
    end try
    return output
end tell"#
    )
}

/// Parses sent-mail blocks. Unlike inbox reads the body runs to the end of
/// the block, so multi-line bodies survive.
pub(crate) fn parse_sent_mail(raw: &str) -> Result<Vec<Sample>> {
    if let Some(err) = raw.trim_start().strip_prefix("ERROR:") {
        bail!("Mail.app error: {}", err.trim());
    }

    let mut samples = Vec::new();
    for block in raw.split(BLOCK_MARKER) {
        let block = block.replace("\r\n", "\n").replace('\r', "\n");
        let mut subject = String::new();
        let mut body: Vec<&str> = Vec::new();
        let mut in_body = false;
        for line in block.trim().lines() {
            if in_body {
                body.push(line);
            } else if let Some(v) = line.strip_prefix("subject:") {
                subject = v.trim().to_string();
            } else if let Some(v) = line.strip_prefix("body:") {
                in_body = true;
                body.push(v.trim());
            }
        }
        let body = body.join("\n").trim().to_string();
        if subject.chars().count() < MIN_SUBJECT_CHARS
            || body.chars().count() < MIN_EMAIL_BODY_CHARS
        {
            continue;
        }
        samples.push(Sample {
            instruction: format!("Write an email with subject: \"{subject}\""),
            output: body,
        });
    }
    Ok(samples)
}

/// Runs `cmd` and returns its stdout, killing it once `timeout` passes.
/// Output is drained on helper threads so a chatty child never blocks on
/// a full pipe.
pub(crate) fn capture_with_timeout(cmd: &mut Command, timeout: Duration) -> Result<String> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to start {program}"))?;

    let drain = |pipe: Option<Box<dyn Read + Send>>| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            if let Some(mut pipe) = pipe {
                let _ = pipe.read_to_end(&mut buf);
            }
            String::from_utf8_lossy(&buf).into_owned()
        })
    };
    let stdout = drain(child.stdout.take().map(|p| Box::new(p) as Box<dyn Read + Send>));
    let stderr = drain(child.stderr.take().map(|p| Box::new(p) as Box<dyn Read + Send>));

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child
            .try_wait()
            .with_context(|| format!("failed to wait for {program}"))?
        {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            bail!("{program} timed out after {}s", timeout.as_secs());
        }
        std::thread::sleep(Duration::from_millis(50));
    };

    let out = stdout.join().unwrap_or_default();
    if !status.success() {
        let err = stderr.join().unwrap_or_default();
        bail!("{program} failed: {}", err.trim());
    }
    Ok(out.trim().to_string())
}

pub(crate) fn write_dataset(path: &Path, samples: &[Sample]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let mut file = std::io::BufWriter::new(
        std::fs::File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
    );
    for sample in samples {
        serde_json::to_writer(&mut file, sample)?;
        file.write_all(b"\n")?;
    }
    file.flush()?;
    Ok(())
}

/// Non-blank lines in a dataset; zero when it does not exist.
pub fn dataset_count(path: &Path) -> usize {
    let Ok(file) = std::fs::File::open(path) else {
        return 0;
    };
    BufReader::new(file)
        .lines()
        .map_while(|l| l.ok())
        .filter(|l| !l.trim().is_empty())
        .count()
}

/// First `n` samples of a dataset. Unparseable lines are skipped.
pub fn preview_dataset(path: &Path, n: usize) -> Vec<Sample> {
    let Ok(file) = std::fs::File::open(path) else {
        return Vec::new();
    };
    BufReader::new(file)
        .lines()
        .map_while(|l| l.ok())
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(&l).ok())
        .take(n)
        .collect()
}

pub(crate) fn collect_messages(
    db_path: &Path,
    scratch_dir: &Path,
    months: u32,
    out: &Path,
    sink: &LogSink,
) -> Result<usize> {
    sink.line(format!(
        "[courier] Reading sent iMessages from the last {months} months..."
    ));
    let snapshot = MessageConnector::snapshot(db_path, scratch_dir)?;
    let conn = snapshot.open()?;
    let cutoff = cocoa_cutoff(chrono::Utc::now().timestamp(), months);
    let lines = query_chat_lines(&conn, cutoff).context("Messages query failed")?;
    sink.line(format!("[courier] Scanned {} messages", lines.len()));

    let samples = pair_replies(&lines);
    write_dataset(out, &samples)?;
    Ok(samples.len())
}

pub(crate) fn collect_email(
    osascript: &str,
    months: u32,
    out: &Path,
    sink: &LogSink,
) -> Result<usize> {
    let limit = months as usize * 30;
    sink.line(format!(
        "[courier] Reading up to {limit} sent emails from Mail..."
    ));
    let mut cmd = Command::new(osascript);
    cmd.arg("-e").arg(sent_mail_script(limit));
    let raw = capture_with_timeout(&mut cmd, MAIL_TIMEOUT)?;

    let samples = parse_sent_mail(&raw)?;
    write_dataset(out, &samples)?;
    Ok(samples.len())
}
