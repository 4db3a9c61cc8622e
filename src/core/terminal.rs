use console::{Emoji, style};

pub static SUCCESS_ICON: Emoji<'_, '_> = Emoji("✅ ", "");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "");
pub static GLOBE: Emoji<'_, '_> = Emoji("🌐 ", "");
pub static GEAR: Emoji<'_, '_> = Emoji("⚙️  ", "");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "");

pub fn print_success(msg: &str) {
    println!("{} {}", SUCCESS_ICON, style(msg).green());
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", ERROR_ICON, style(msg).red().bold());
}

pub fn print_status(label: &str, msg: &str) {
    println!("  {} {}: {}", GEAR, style(label).bold().cyan(), msg);
}

pub fn print_step(step: &str) {
    println!("{} {}", SPARKLE, style(step).bold());
}

pub fn print_link(label: &str, url: &str) {
    println!(
        "  {} {}: {}",
        GLOBE,
        style(label).bold(),
        style(url).underlined().cyan()
    );
}

/// Progress line from a running turn or job, dimmed so streamed
/// answer text stands out.
pub fn print_progress(msg: &str) {
    println!("  {}", style(msg).dim());
}

enum GuideLine {
    Command(String, String),
    Status(String, String),
    Text(String),
    Blank,
}

/// Titled block of aligned command or status rows.
pub struct GuideSection {
    title: String,
    lines: Vec<GuideLine>,
}

impl GuideSection {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            lines: Vec::new(),
        }
    }

    pub fn command(mut self, name: &str, description: &str) -> Self {
        self.lines
            .push(GuideLine::Command(name.to_string(), description.to_string()));
        self
    }

    pub fn status(mut self, label: &str, value: &str) -> Self {
        self.lines
            .push(GuideLine::Status(label.to_string(), value.to_string()));
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.lines.push(GuideLine::Text(text.to_string()));
        self
    }

    pub fn blank(mut self) -> Self {
        self.lines.push(GuideLine::Blank);
        self
    }

    pub fn print(&self) {
        let width = self
            .lines
            .iter()
            .map(|l| match l {
                GuideLine::Command(name, _) => name.chars().count(),
                GuideLine::Status(label, _) => label.chars().count(),
                GuideLine::Text(_) | GuideLine::Blank => 0,
            })
            .max()
            .unwrap_or(0);

        println!("\n {}", style(&self.title).bold().underlined());
        for line in &self.lines {
            match line {
                GuideLine::Command(name, description) => println!(
                    "   {}  {}",
                    style(format!("{name:<width$}")).green(),
                    description
                ),
                GuideLine::Status(label, value) => println!(
                    "   {}  {}",
                    style(format!("{label:<width$}")).bold().cyan(),
                    value
                ),
                GuideLine::Text(text) => println!("   {}", text),
                GuideLine::Blank => println!(),
            }
        }
    }
}

pub fn print_banner() {
    println!();
    println!(
        "{} {}",
        style("courier").bold().cyan(),
        style("· your messages, mail and files, one local assistant").dim()
    );
    println!();
}

pub fn print_goodbye() {
    println!("\n{} {}", SPARKLE, style("Goodbye!").bold().cyan());
}
