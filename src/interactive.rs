use crate::config::{AudioFormat, Config, MAX_SEGMENT_DURATION, MIN_SEGMENT_DURATION};
use console::style;
use dialoguer::{Confirm, Input, Select};
use std::fs;
use std::path::{Path, PathBuf};

const SUPPORTED_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a", "ogg", "flac", "webm", "mp4"];

pub struct InteractiveResult {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub config: Config,
}

pub fn run_interactive_wizard() -> anyhow::Result<InteractiveResult> {
    print_header();

    let mut config = setup_api_token()?;
    let input = select_source_file()?;
    config.max_segment_duration = select_max_duration(config.max_segment_duration)?;
    config.audio_format = select_audio_format(config.audio_format)?;

    let output_dir = derive_output_dir(&input);
    print_summary(&input, &output_dir, &config);

    if !Confirm::new()
        .with_prompt("Proceed with these settings?")
        .default(true)
        .interact()?
    {
        anyhow::bail!("Cancelled by user");
    }

    println!();

    Ok(InteractiveResult {
        input,
        output_dir,
        config,
    })
}

fn print_header() {
    println!();
    println!(
        "{}",
        style("╔═══════════════════════════════════════════════════╗").cyan()
    );
    println!(
        "{}",
        style("║        dubsplit - Lip-sync Audio Segmenter        ║").cyan()
    );
    println!(
        "{}",
        style("╚═══════════════════════════════════════════════════╝").cyan()
    );
    println!();
}

fn setup_api_token() -> anyhow::Result<Config> {
    let mut config = Config::load().unwrap_or_default();

    if config
        .replicate_api_token
        .as_deref()
        .is_some_and(|t| !t.trim().is_empty())
    {
        println!("{} Replicate token configured", style("✓").green());
        return Ok(config);
    }

    println!("{} Replicate API token not found", style("!").yellow());
    println!("  Get one at: https://replicate.com/account/api-tokens\n");

    let token: String = Input::new()
        .with_prompt("Enter your Replicate API token")
        .interact_text()?;

    if token.trim().is_empty() {
        anyhow::bail!("API token is required");
    }

    config.replicate_api_token = Some(token.trim().to_string());

    if Confirm::new()
        .with_prompt("Save token to config file?")
        .default(true)
        .interact()?
    {
        let path = config.save()?;
        println!("{} Token saved to {}\n", style("✓").green(), path.display());
    }

    Ok(config)
}

fn select_source_file() -> anyhow::Result<PathBuf> {
    println!("\n{}", style("Select source audio:").bold());

    let files = scan_audio_files(".")?;

    if files.is_empty() {
        println!("  No audio files found in current directory.\n");
        return prompt_path();
    }

    let mut items: Vec<String> = files
        .iter()
        .map(|f| {
            let size = fs::metadata(f)
                .map(|m| format_size(m.len()))
                .unwrap_or_else(|_| "?".to_string());
            format!("{} ({})", f.display(), size)
        })
        .collect();
    items.push("Enter custom path...".to_string());

    let selection = Select::new()
        .with_prompt("Choose a file")
        .items(&items)
        .default(0)
        .interact()?;

    if selection == files.len() {
        prompt_path()
    } else {
        Ok(files[selection].clone())
    }
}

fn prompt_path() -> anyhow::Result<PathBuf> {
    let path: String = Input::new()
        .with_prompt("Enter file path")
        .interact_text()?;
    let path = PathBuf::from(path.trim());
    if !path.exists() {
        anyhow::bail!("File not found: {}", path.display());
    }
    Ok(path)
}

fn scan_audio_files(dir: &str) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && has_supported_extension(&path) {
            files.push(path);
        }
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

fn parse_duration(input: &str) -> Result<f64, String> {
    let value: f64 = input
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a number", input.trim()))?;
    if !(MIN_SEGMENT_DURATION..=MAX_SEGMENT_DURATION).contains(&value) {
        return Err(format!(
            "Enter a value between {} and {}",
            MIN_SEGMENT_DURATION, MAX_SEGMENT_DURATION
        ));
    }
    Ok(value)
}

fn select_max_duration(current: f64) -> anyhow::Result<f64> {
    let text: String = Input::new()
        .with_prompt("Max segment duration (seconds)")
        .default(format!("{}", current))
        .validate_with(|input: &String| parse_duration(input).map(|_| ()))
        .interact_text()?;
    parse_duration(&text).map_err(|e| anyhow::anyhow!(e))
}

fn select_audio_format(current: AudioFormat) -> anyhow::Result<AudioFormat> {
    let formats = [
        ("MP3", "128 kbps, smallest upload", AudioFormat::Mp3),
        ("WAV", "16-bit PCM, lossless", AudioFormat::Wav),
    ];

    let items: Vec<String> = formats
        .iter()
        .map(|(name, desc, _)| format!("{} - {}", name, desc))
        .collect();
    let default = formats.iter().position(|f| f.2 == current).unwrap_or(0);

    let selection = Select::new()
        .with_prompt("Select segment format")
        .items(&items)
        .default(default)
        .interact()?;

    Ok(formats[selection].2)
}

fn derive_output_dir(input: &Path) -> PathBuf {
    input
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn print_summary(input: &Path, output_dir: &Path, config: &Config) {
    println!("\n{}", style("═══ Summary ═══").bold());
    println!("  Input:        {}", style(input.display()).cyan());
    println!("  Output dir:   {}", style(output_dir.display()).cyan());
    println!("  Max duration: {}s", config.max_segment_duration);
    println!("  Format:       {}", config.audio_format.to_string().to_uppercase());
    println!();
}
