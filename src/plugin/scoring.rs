//! Candidate scoring: how the coordinator decides which peer's file to
//! download.

use crate::models::FormatPreference;
use crate::worker::rename::sanitize;

use super::client::SearchResultFile;

/// Extensions that earn the audio-type bonus.
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "wav", "m4a", "ogg", "aac", "wma"];

const MB: u64 = 1024 * 1024;

/// A scored remote file. The top five per search are retained.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub file: SearchResultFile,
    pub score: i64,
}

/// What the candidate is measured against.
#[derive(Debug, Clone)]
pub struct ScoreTarget {
    pub artist: String,
    pub track: String,
    pub query: String,
    pub duration_seconds: u32,
    pub format_preference: FormatPreference,
}

/// Sum of the component scores for one search result.
pub fn score_candidate(file: &SearchResultFile, target: &ScoreTarget) -> i64 {
    let mut score = bitrate_score(file.bitrate);
    score += match file.duration_seconds {
        Some(duration) if target.duration_seconds > 0 => {
            duration_fit_score(f64::from(duration), f64::from(target.duration_seconds))
        }
        _ => 0,
    };
    score += size_score(file.size_bytes);
    score += filename_match_score(file, target);
    score += type_bonus(file);
    score += format_preference_adjustment(file, target.format_preference);
    score
}

/// 320 kbps and above scores 100; lower bitrates score proportionally
/// (256 → 80, 192 → 60, 128 → 40).
pub fn bitrate_score(bitrate: Option<u32>) -> i64 {
    match bitrate {
        Some(bitrate) => i64::from(bitrate.min(320)) * 100 / 320,
        None => 0,
    }
}

/// Binned absolute distance from the target duration.
pub fn duration_fit_score(file_seconds: f64, target_seconds: f64) -> i64 {
    let diff = (file_seconds - target_seconds).abs();
    if diff <= 2.0 {
        100
    } else if diff <= 5.0 {
        80
    } else if diff <= 10.0 {
        50
    } else if diff <= 20.0 {
        25
    } else {
        0
    }
}

/// Stepped by absolute size; larger files are assumed closer to lossless.
pub fn size_score(size_bytes: u64) -> i64 {
    if size_bytes > 8 * MB {
        50
    } else if size_bytes > 5 * MB {
        40
    } else if size_bytes > 3 * MB {
        30
    } else if size_bytes > MB {
        20
    } else {
        0
    }
}

/// Exact substring match of the sanitized `artist track` earns the full 50;
/// otherwise proportional to how many query words appear in the filename.
pub fn filename_match_score(file: &SearchResultFile, target: &ScoreTarget) -> i64 {
    let filename = sanitize(file.file_name()).to_lowercase();

    let needle = {
        let pair = sanitize(&format!("{} {}", target.artist, target.track))
            .trim()
            .to_lowercase();
        if pair.is_empty() {
            sanitize(&target.query).trim().to_lowercase()
        } else {
            pair
        }
    };
    if needle.is_empty() {
        return 0;
    }
    if filename.contains(&needle) {
        return 50;
    }

    let words: Vec<&str> = needle.split_whitespace().collect();
    if words.is_empty() {
        return 0;
    }
    let matched = words.iter().filter(|w| filename.contains(**w)).count();
    (50 * matched as i64) / words.len() as i64
}

pub fn type_bonus(file: &SearchResultFile) -> i64 {
    if AUDIO_EXTENSIONS.contains(&file.extension().as_str()) {
        10
    } else {
        0
    }
}

/// Preference reorders, it never eliminates.
pub fn format_preference_adjustment(file: &SearchResultFile, preference: FormatPreference) -> i64 {
    match (preference, file.extension().as_str()) {
        (FormatPreference::Mp3, "mp3") => 50,
        (FormatPreference::Mp3, "flac") => -30,
        (FormatPreference::Flac, "flac") => 100,
        (FormatPreference::Flac, "mp3") => -50,
        _ => 0,
    }
}

/// Keep `candidates` sorted by descending score and bounded to the top 5.
pub fn insert_candidate(candidates: &mut Vec<Candidate>, candidate: Candidate) {
    let position = candidates
        .iter()
        .position(|c| c.score < candidate.score)
        .unwrap_or(candidates.len());
    candidates.insert(position, candidate);
    candidates.truncate(5);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, size: u64, bitrate: Option<u32>, duration: Option<u32>) -> SearchResultFile {
        SearchResultFile {
            peer: "peer".to_string(),
            virtual_path: path.to_string(),
            size_bytes: size,
            bitrate,
            duration_seconds: duration,
        }
    }

    fn target(artist: &str, track: &str, duration: u32, pref: FormatPreference) -> ScoreTarget {
        ScoreTarget {
            artist: artist.to_string(),
            track: track.to_string(),
            query: format!("{artist} {track}"),
            duration_seconds: duration,
            format_preference: pref,
        }
    }

    #[test]
    fn bitrate_steps_match_the_ladder() {
        assert_eq!(bitrate_score(Some(320)), 100);
        assert_eq!(bitrate_score(Some(256)), 80);
        assert_eq!(bitrate_score(Some(192)), 60);
        assert_eq!(bitrate_score(Some(128)), 40);
        assert_eq!(bitrate_score(Some(64)), 20);
        assert_eq!(bitrate_score(None), 0);
    }

    #[test]
    fn duration_bins_are_inclusive_at_their_edges() {
        assert_eq!(duration_fit_score(100.0, 102.0), 100);
        assert_eq!(duration_fit_score(100.0, 102.01), 80);
        assert_eq!(duration_fit_score(100.0, 80.0), 25);
        assert_eq!(duration_fit_score(100.0, 79.99), 0);
        assert_eq!(duration_fit_score(100.0, 120.01), 0);
    }

    #[test]
    fn size_steps_are_strictly_greater_than() {
        assert_eq!(size_score(8 * MB), 40);
        assert_eq!(size_score(8 * MB + 1), 50);
        assert_eq!(size_score(5 * MB + 1), 40);
        assert_eq!(size_score(3 * MB + 1), 30);
        assert_eq!(size_score(MB + 1), 20);
        assert_eq!(size_score(MB), 0);
    }

    #[test]
    fn exact_substring_earns_full_filename_score() {
        let f = file(r"music\Prince - Purple Rain.mp3", 0, None, None);
        let t = target("Prince", "Purple Rain", 0, FormatPreference::Mp3);
        assert_eq!(filename_match_score(&f, &t), 50);
    }

    #[test]
    fn partial_word_match_is_proportional() {
        let f = file(r"music\Prince - Something Else.mp3", 0, None, None);
        let t = target("Prince", "Purple Rain", 0, FormatPreference::Mp3);
        // One of three query words ("prince") appears.
        assert_eq!(filename_match_score(&f, &t), 16);
    }

    #[test]
    fn audio_extensions_earn_the_type_bonus() {
        assert_eq!(type_bonus(&file("a.mp3", 0, None, None)), 10);
        assert_eq!(type_bonus(&file("a.flac", 0, None, None)), 10);
        assert_eq!(type_bonus(&file("a.txt", 0, None, None)), 0);
    }

    #[test]
    fn format_preference_reorders_without_eliminating() {
        let mp3 = file("a.mp3", 0, None, None);
        let flac = file("a.flac", 0, None, None);
        assert_eq!(format_preference_adjustment(&mp3, FormatPreference::Mp3), 50);
        assert_eq!(format_preference_adjustment(&flac, FormatPreference::Mp3), -30);
        assert_eq!(format_preference_adjustment(&flac, FormatPreference::Flac), 100);
        assert_eq!(format_preference_adjustment(&mp3, FormatPreference::Flac), -50);
    }

    #[test]
    fn flac_preference_flips_the_winner() {
        // An mp3 scoring 180 raw drops to 130 under a flac preference,
        // while a flac scoring 120 raw climbs to 220.
        let mp3 = file("a.mp3", 0, Some(320), None);
        let flac = file("b.flac", 0, None, None);

        let raw_mp3 = 180;
        let raw_flac = 120;
        assert_eq!(
            raw_mp3 + format_preference_adjustment(&mp3, FormatPreference::Flac),
            130
        );
        assert_eq!(
            raw_flac + format_preference_adjustment(&flac, FormatPreference::Flac),
            220
        );
    }

    #[test]
    fn top_five_candidates_are_retained_in_order() {
        let mut candidates = Vec::new();
        for (i, score) in [310i64, 30, 305, 80, 120, 90].iter().enumerate() {
            insert_candidate(
                &mut candidates,
                Candidate {
                    file: file(&format!("f{i}.mp3"), 0, None, None),
                    score: *score,
                },
            );
        }
        let scores: Vec<i64> = candidates.iter().map(|c| c.score).collect();
        assert_eq!(scores, vec![310, 305, 120, 90, 80]);
    }
}
