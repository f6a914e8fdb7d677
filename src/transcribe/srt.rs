use super::WordTiming;
use regex::Regex;
use std::sync::OnceLock;

fn cue_timestamp() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d{2}):(\d{2}):(\d{2}),(\d{3})\s*-->\s*(\d{2}):(\d{2}):(\d{2}),(\d{3})")
            .expect("valid SRT timestamp regex")
    })
}

fn block_separator() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\r?\n\s*\r?\n").expect("valid SRT separator regex"))
}

/// Parse SRT cues into timings. Malformed blocks are skipped.
pub fn parse_srt(text: &str) -> Vec<WordTiming> {
    let mut cues = Vec::new();

    for block in block_separator().split(text.trim()) {
        let lines: Vec<&str> = block.trim().lines().collect();
        if lines.len() < 3 {
            continue;
        }

        let Some(caps) = cue_timestamp().captures(lines[1]) else {
            continue;
        };

        let field = |i: usize| caps[i].parse::<f64>().unwrap_or(0.0);
        let start = field(1) * 3600.0 + field(2) * 60.0 + field(3) + field(4) / 1000.0;
        let end = field(5) * 3600.0 + field(6) * 60.0 + field(7) + field(8) / 1000.0;
        let body = lines[2..].join(" ").trim().to_string();

        cues.push(WordTiming::new(start, end, body));
    }

    cues
}
