//! Style-model fine-tuning: dataset collection, LoRA training with mlx,
//! fusing, GGUF export and registration with the local Ollama daemon.
//! Everything here is blocking and only ever runs on a job worker thread.

use anyhow::{Context, Result, anyhow, bail};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use super::collect::{self, Sample};
use super::{JobKind, JobOp, JobRegistry, JobState, LogSink};
use crate::core::config::TrainingConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Messages,
    Email,
}

impl Target {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "messages" | "texts" | "imessage" => Some(Target::Messages),
            "email" | "emails" | "mail" => Some(Target::Email),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Target::Messages => "messages",
            Target::Email => "email",
        }
    }

    fn stem(self) -> &'static str {
        match self {
            Target::Messages => "imessage",
            Target::Email => "email",
        }
    }

    pub fn model_name(self) -> &'static str {
        match self {
            Target::Messages => "my-imessage-style",
            Target::Email => "my-email-style",
        }
    }

    fn style_prompt(self) -> &'static str {
        match self {
            Target::Messages => {
                "Write exactly like the user's casual iMessages. Match their tone, length, \
                 punctuation style, and phrasing. Keep replies conversational and natural."
            }
            Target::Email => {
                "Write exactly like the user's professional emails. Match their tone, \
                 structure, sign-off style, and level of formality."
            }
        }
    }

    pub fn collect_kind(self) -> JobKind {
        match self {
            Target::Messages => JobKind::CollectMessages,
            Target::Email => JobKind::CollectEmail,
        }
    }

    pub fn train_kind(self) -> JobKind {
        match self {
            Target::Messages => JobKind::TrainMessages,
            Target::Email => JobKind::TrainEmail,
        }
    }

    pub fn register_kind(self) -> JobKind {
        match self {
            Target::Messages => JobKind::RegisterMessages,
            Target::Email => JobKind::RegisterEmail,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobAction {
    Collect,
    Train,
    Register,
}

impl JobKind {
    pub fn target(self) -> Target {
        match self {
            JobKind::CollectMessages | JobKind::TrainMessages | JobKind::RegisterMessages => {
                Target::Messages
            }
            JobKind::CollectEmail | JobKind::TrainEmail | JobKind::RegisterEmail => Target::Email,
        }
    }

    pub fn action(self) -> JobAction {
        match self {
            JobKind::CollectMessages | JobKind::CollectEmail => JobAction::Collect,
            JobKind::TrainMessages | JobKind::TrainEmail => JobAction::Train,
            JobKind::RegisterMessages | JobKind::RegisterEmail => JobAction::Register,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Toolchain {
    config: TrainingConfig,
    datasets_dir: PathBuf,
    adapters_dir: PathBuf,
    scratch_dir: PathBuf,
    messages_db: Option<PathBuf>,
}

impl Toolchain {
    pub fn new(config: TrainingConfig, root: &Path) -> Self {
        Self {
            config,
            datasets_dir: root.join("datasets"),
            adapters_dir: root.join("adapters"),
            scratch_dir: root.join("scratch"),
            messages_db: None,
        }
    }

    /// Source for message collection.
    pub fn with_messages_db(mut self, path: PathBuf) -> Self {
        self.messages_db = Some(path);
        self
    }

    pub fn dataset_path(&self, target: Target) -> PathBuf {
        self.datasets_dir
            .join(format!("{}_style.jsonl", target.stem()))
    }

    pub fn adapter_path(&self, target: Target) -> PathBuf {
        self.adapters_dir.join(target.stem())
    }

    pub fn modelfile_path(&self, target: Target) -> PathBuf {
        self.adapters_dir.join(format!("{}.Modelfile", target.stem()))
    }

    fn gguf_path(&self, target: Target) -> PathBuf {
        self.adapters_dir.join(format!("{}.gguf", target.stem()))
    }

    /// Whether the kind's output is already on disk from an earlier run.
    pub fn artifact_exists(&self, kind: JobKind) -> bool {
        let target = kind.target();
        match kind.action() {
            JobAction::Collect => self.dataset_count(target) > 0,
            JobAction::Train => {
                let adapter = self.adapter_path(target);
                adapter.join("adapters.safetensors").exists()
                    || adapter.join("adapter_config.json").exists()
            }
            JobAction::Register => self.modelfile_path(target).exists(),
        }
    }

    pub fn dataset_count(&self, target: Target) -> usize {
        collect::dataset_count(&self.dataset_path(target))
    }

    pub fn preview_dataset(&self, target: Target, n: usize) -> Vec<Sample> {
        collect::preview_dataset(&self.dataset_path(target), n)
    }

    /// Gate state for `kind`, reported as done when a run from an earlier
    /// process already left its artifact behind.
    pub fn status(&self, registry: &JobRegistry, kind: JobKind) -> JobState {
        match registry.state(kind) {
            JobState::Idle if self.artifact_exists(kind) => JobState::Done,
            state => state,
        }
    }

    pub fn operation(&self, kind: JobKind) -> JobOp {
        let toolchain = self.clone();
        let target = kind.target();
        match kind.action() {
            JobAction::Collect => Box::new(move |sink| toolchain.collect(target, sink)),
            JobAction::Train => Box::new(move |sink| toolchain.train(target, sink)),
            JobAction::Register => Box::new(move |sink| toolchain.register(target, sink)),
        }
    }

    /// Lines streamed after a failed run. Registration gets a Modelfile the
    /// user can finish by hand; the other actions have nothing to offer.
    pub fn fallback(&self, kind: JobKind) -> Vec<String> {
        match kind.action() {
            JobAction::Register => self.modelfile_template(kind.target()),
            JobAction::Collect | JobAction::Train => Vec::new(),
        }
    }

    pub fn modelfile_template(&self, target: Target) -> Vec<String> {
        let name = target.model_name();
        let mut lines = vec![
            format!("# Save this as {name}.Modelfile and run:"),
            format!("# ollama create {name} -f {name}.Modelfile"),
            String::new(),
        ];
        lines.extend(modelfile(&self.gguf_path(target), target).lines().map(String::from));
        lines
    }

    fn collect(&self, target: Target, sink: &LogSink) -> Result<String> {
        let out = self.dataset_path(target);
        let months = self.config.collect_months;
        let count = match target {
            Target::Messages => {
                let db = self
                    .messages_db
                    .as_deref()
                    .ok_or_else(|| anyhow!("No Messages database configured"))?;
                collect::collect_messages(db, &self.scratch_dir, months, &out, sink)?
            }
            Target::Email => collect::collect_email(&self.config.osascript, months, &out, sink)?,
        };
        if count == 0 {
            sink.line("[courier] No usable samples found; training needs at least a few.");
        }
        Ok(format!(
            "[courier] Collected {count} samples into {}",
            out.display()
        ))
    }

    fn train(&self, target: Target, sink: &LogSink) -> Result<String> {
        let dataset = self.dataset_path(target);
        let adapter = self.adapter_path(target);
        if !dataset.exists() {
            bail!(
                "Dataset not found: {}. Run data collection first.",
                dataset.display()
            );
        }
        std::fs::create_dir_all(&adapter)
            .with_context(|| format!("failed to create {}", adapter.display()))?;

        sink.line(format!(
            "[courier] Starting LoRA training for {}",
            target.stem()
        ));
        let mut cmd = Command::new(&self.config.python);
        cmd.args(["-m", "mlx_lm.lora", "--model", self.config.base_model.as_str(), "--train"])
            .arg("--data")
            .arg(&dataset)
            .arg("--adapter-path")
            .arg(&adapter)
            .arg("--iters")
            .arg(self.config.iters.to_string())
            .arg("--learning-rate")
            .arg(self.config.learning_rate.to_string())
            .arg("--batch-size")
            .arg(self.config.batch_size.to_string())
            .args(["--val-batches", "0"]);
        run_streaming(&mut cmd, sink)?;

        Ok(format!(
            "[courier] Training complete. Adapter saved to: {}",
            adapter.display()
        ))
    }

    fn register(&self, target: Target, sink: &LogSink) -> Result<String> {
        let adapter = self.adapter_path(target);
        if !adapter.exists() {
            bail!(
                "No trained adapter found at {}. Run training first.",
                adapter.display()
            );
        }
        let fused = self
            .adapters_dir
            .join(format!("{}_fused", target.stem()));
        let converted = self.adapters_dir.join(format!("{}_gguf", target.stem()));
        let name = target.model_name();

        sink.line("[courier] Step 1/4: Fusing adapter into base model...");
        std::fs::create_dir_all(&fused)
            .with_context(|| format!("failed to create {}", fused.display()))?;
        let mut fuse = Command::new(&self.config.python);
        fuse.args(["-m", "mlx_lm.fuse", "--model", self.config.base_model.as_str()])
            .arg("--adapter-path")
            .arg(&adapter)
            .arg("--save-path")
            .arg(&fused);
        run_streaming(&mut fuse, sink)?;

        sink.line("[courier] Step 2/4: Converting to GGUF...");
        let mut convert = Command::new(&self.config.python);
        convert
            .args(["-m", "mlx_lm.convert", "--hf-path"])
            .arg(&fused)
            .arg("--mlx-path")
            .arg(&converted)
            .args(["--dtype", "float16"]);
        run_streaming(&mut convert, sink)?;

        let gguf = locate_gguf(&converted, &self.gguf_path(target), &self.adapters_dir)
            .ok_or_else(|| {
                anyhow!(
                    "No GGUF file found after conversion. Check {} manually and create the Modelfile yourself.",
                    self.adapters_dir.display()
                )
            })?;
        sink.line(format!("[courier] Using GGUF at: {}", gguf.display()));

        sink.line("[courier] Step 3/4: Writing Modelfile...");
        let modelfile_path = self.modelfile_path(target);
        std::fs::write(&modelfile_path, modelfile(&gguf, target))
            .with_context(|| format!("failed to write {}", modelfile_path.display()))?;
        sink.line(format!(
            "[courier] Modelfile written to: {}",
            modelfile_path.display()
        ));

        sink.line(format!(
            "[courier] Step 4/4: Registering '{name}' with Ollama..."
        ));
        let mut create = Command::new(&self.config.ollama);
        create.args(["create", name, "-f"]).arg(&modelfile_path);
        run_streaming(&mut create, sink)?;

        sink.line("[courier] Switch to it in the settings to use your personal style.");
        Ok(format!("[courier] Model '{name}' is ready in Ollama."))
    }
}

fn modelfile(gguf: &Path, target: Target) -> String {
    format!(
        "FROM {}\nSYSTEM \"{}\"\nPARAMETER temperature 0.7\n",
        gguf.display(),
        target.style_prompt()
    )
}

/// Conversion output moves between toolchain versions; try the expected
/// spots first, then anything under the adapters directory.
fn locate_gguf(converted: &Path, expected: &Path, search_root: &Path) -> Option<PathBuf> {
    let candidate = converted.join("model.gguf");
    if candidate.exists() {
        return Some(candidate);
    }
    if expected.exists() {
        return Some(expected.to_path_buf());
    }
    find_gguf(search_root)
}

fn find_gguf(dir: &Path) -> Option<PathBuf> {
    let mut entries: Vec<_> = std::fs::read_dir(dir).ok()?.flatten().map(|e| e.path()).collect();
    entries.sort();
    for path in &entries {
        if path.is_file() && path.extension().is_some_and(|ext| ext == "gguf") {
            return Some(path.clone());
        }
    }
    entries
        .iter()
        .filter(|p| p.is_dir())
        .find_map(|p| find_gguf(p))
}

/// Runs a command to completion, forwarding its output line by line.
/// stdout and stderr share one pipe, so lines arrive in the order the
/// child wrote them.
fn run_streaming(cmd: &mut Command, sink: &LogSink) -> Result<()> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    let rendered = std::iter::once(program.clone())
        .chain(cmd.get_args().map(|a| a.to_string_lossy().into_owned()))
        .collect::<Vec<_>>()
        .join(" ");
    sink.line(format!("[courier] Running: {rendered}"));

    let (reader, writer) = std::io::pipe().context("failed to create output pipe")?;
    let spawned = cmd
        .env("PYTHONUNBUFFERED", "1")
        .stdin(Stdio::null())
        .stdout(writer.try_clone().context("failed to clone output pipe")?)
        .stderr(writer)
        .spawn();
    // The command keeps its copies of the write end until they are
    // replaced; EOF only arrives once the child holds the last one.
    cmd.stdout(Stdio::null()).stderr(Stdio::null());
    let mut child = spawned.with_context(|| format!("failed to start {program}"))?;

    for line in BufReader::new(reader).lines().map_while(|l| l.ok()) {
        sink.line(line.trim_end().to_string());
    }

    let status = child
        .wait()
        .with_context(|| format!("failed to wait for {program}"))?;
    if !status.success() {
        match status.code() {
            Some(code) => bail!("Command failed (exit {code}): {rendered}"),
            None => bail!("Command terminated by signal: {rendered}"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn toolchain(root: &Path) -> Toolchain {
        Toolchain::new(TrainingConfig::default(), root)
    }

    fn sink() -> (LogSink, mpsc::UnboundedReceiver<super::super::JobItem>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (LogSink { tx }, rx)
    }

    fn drain(mut rx: mpsc::UnboundedReceiver<super::super::JobItem>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(item) = rx.try_recv() {
            if let super::super::JobItem::Log(l) = item {
                lines.push(l);
            }
        }
        lines
    }

    #[test]
    fn targets_parse_and_map_to_kinds() {
        assert_eq!(Target::parse("Messages"), Some(Target::Messages));
        assert_eq!(Target::parse("email"), Some(Target::Email));
        assert_eq!(Target::parse("fax"), None);
        assert_eq!(Target::Email.register_kind(), JobKind::RegisterEmail);
        assert_eq!(JobKind::TrainMessages.target(), Target::Messages);
        assert_eq!(JobKind::CollectEmail.target(), Target::Email);
        assert_eq!(JobKind::TrainMessages.action(), JobAction::Train);
        assert_eq!(Target::Messages.collect_kind().action(), JobAction::Collect);
    }

    #[test]
    fn train_without_dataset_fails_with_hint() {
        let dir = tempfile::tempdir().unwrap();
        let tc = toolchain(dir.path());
        let (sink, _rx) = sink();

        let err = tc.train(Target::Messages, &sink).unwrap_err().to_string();
        assert!(err.contains("Dataset not found"));
        assert!(err.contains("Run data collection first"));
    }

    #[test]
    fn register_without_adapter_fails_before_running_anything() {
        let dir = tempfile::tempdir().unwrap();
        let tc = toolchain(dir.path());
        let (sink, rx) = sink();

        let err = tc.register(Target::Email, &sink).unwrap_err().to_string();
        assert!(err.contains("No trained adapter"));
        assert!(drain(rx).is_empty());
    }

    #[test]
    fn artifacts_are_detected_per_kind() {
        let dir = tempfile::tempdir().unwrap();
        let tc = toolchain(dir.path());
        assert!(!tc.artifact_exists(JobKind::TrainMessages));

        let adapter = tc.adapter_path(Target::Messages);
        std::fs::create_dir_all(&adapter).unwrap();
        std::fs::write(adapter.join("adapter_config.json"), "{}").unwrap();
        assert!(tc.artifact_exists(JobKind::TrainMessages));
        assert!(!tc.artifact_exists(JobKind::RegisterMessages));

        std::fs::write(tc.modelfile_path(Target::Messages), "FROM x").unwrap();
        assert!(tc.artifact_exists(JobKind::RegisterMessages));
        assert!(!tc.artifact_exists(JobKind::TrainEmail));
    }

    #[test]
    fn collected_dataset_counts_as_collect_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let tc = toolchain(dir.path());
        assert!(!tc.artifact_exists(JobKind::CollectMessages));

        collect::write_dataset(
            &tc.dataset_path(Target::Messages),
            &[Sample {
                instruction: "Reply to this iMessage: \"hey\"".into(),
                output: "hello!".into(),
            }],
        )
        .unwrap();

        assert!(tc.artifact_exists(JobKind::CollectMessages));
        assert_eq!(tc.dataset_count(Target::Messages), 1);
        assert_eq!(tc.preview_dataset(Target::Messages, 5)[0].output, "hello!");
        assert!(!tc.artifact_exists(JobKind::CollectEmail));
    }

    #[test]
    fn message_collection_requires_a_database() {
        let dir = tempfile::tempdir().unwrap();
        let tc = toolchain(dir.path());
        let (sink, _rx) = sink();
        let err = tc.collect(Target::Messages, &sink).unwrap_err().to_string();
        assert!(err.contains("No Messages database"));
    }

    #[test]
    fn missing_chat_db_is_reported_with_access_hint() {
        let dir = tempfile::tempdir().unwrap();
        let tc = toolchain(dir.path()).with_messages_db(dir.path().join("absent.db"));
        let (sink, _rx) = sink();
        let err = tc.collect(Target::Messages, &sink).unwrap_err().to_string();
        assert!(err.contains("Full Disk Access"));
        assert!(!tc.dataset_path(Target::Messages).exists());
    }

    #[test]
    fn idle_status_is_upgraded_by_existing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let tc = toolchain(dir.path());
        let registry = JobRegistry::new();
        assert_eq!(tc.status(&registry, JobKind::RegisterEmail), JobState::Idle);

        std::fs::create_dir_all(dir.path().join("adapters")).unwrap();
        std::fs::write(tc.modelfile_path(Target::Email), "FROM x").unwrap();
        assert_eq!(tc.status(&registry, JobKind::RegisterEmail), JobState::Done);
    }

    #[test]
    fn fallback_is_a_modelfile_only_for_register() {
        let dir = tempfile::tempdir().unwrap();
        let tc = toolchain(dir.path());

        assert!(tc.fallback(JobKind::TrainEmail).is_empty());
        assert!(tc.fallback(JobKind::CollectEmail).is_empty());
        let lines = tc.fallback(JobKind::RegisterEmail);
        assert!(lines[0].contains("my-email-style.Modelfile"));
        assert!(lines.iter().any(|l| l.starts_with("FROM ")));
        assert!(lines.iter().any(|l| l.starts_with("SYSTEM \"Write exactly like")));
        assert!(lines.contains(&"PARAMETER temperature 0.7".to_string()));
    }

    #[test]
    fn gguf_is_found_recursively() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("weights.gguf"), b"").unwrap();

        let found = locate_gguf(
            &dir.path().join("missing"),
            &dir.path().join("missing.gguf"),
            dir.path(),
        );
        assert_eq!(found, Some(nested.join("weights.gguf")));
    }

    #[test]
    fn expected_gguf_location_wins() {
        let dir = tempfile::tempdir().unwrap();
        let converted = dir.path().join("imessage_gguf");
        std::fs::create_dir_all(&converted).unwrap();
        std::fs::write(converted.join("model.gguf"), b"").unwrap();
        std::fs::write(dir.path().join("other.gguf"), b"").unwrap();

        let found = locate_gguf(&converted, &dir.path().join("x.gguf"), dir.path());
        assert_eq!(found, Some(converted.join("model.gguf")));
    }

    #[cfg(unix)]
    #[test]
    fn command_output_is_streamed_and_exit_code_checked() {
        let (sink, rx) = sink();
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo one; echo two >&2; exit 3"]);

        let err = run_streaming(&mut cmd, &sink).unwrap_err().to_string();
        assert!(err.contains("exit 3"));

        let lines = drain(rx);
        assert!(lines[0].starts_with("[courier] Running: sh -c"));
        assert!(lines.contains(&"one".to_string()));
        assert!(lines.contains(&"two".to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn interleaved_stdout_and_stderr_keep_their_order() {
        let (sink, rx) = sink();
        let mut cmd = Command::new("sh");
        cmd.args([
            "-c",
            "i=0; while [ $i -lt 300 ]; do echo o$i; echo e$i >&2; i=$((i+1)); done",
        ]);

        run_streaming(&mut cmd, &sink).unwrap();

        let expected: Vec<String> = (0..300)
            .flat_map(|i| [format!("o{i}"), format!("e{i}")])
            .collect();
        assert_eq!(drain(rx)[1..], expected[..]);
    }

    #[test]
    fn missing_program_is_reported() {
        let (sink, _rx) = sink();
        let mut cmd = Command::new("courier-no-such-binary");
        let err = run_streaming(&mut cmd, &sink).unwrap_err().to_string();
        assert!(err.contains("failed to start courier-no-such-binary"));
    }
}
