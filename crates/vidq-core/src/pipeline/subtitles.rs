//! SRT -> WebVTT conversion for downloaded captions.

/// Convert SRT text to WebVTT: header added, cue numbers dropped,
/// decimal commas in timing lines turned into dots.
pub fn srt_to_vtt(srt: &str) -> String {
    let mut out = String::from("WEBVTT\n\n");
    let body = srt.trim_start_matches('\u{feff}').replace("\r\n", "\n");
    for line in body.trim().lines() {
        let trimmed = line.trim();
        if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        if trimmed.contains("-->") {
            out.push_str(&trimmed.replace(',', "."));
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }
    out
}
