//! Trace comparison against golden fixtures
//!
//! Verification is a byte-for-byte compare of the captured trace file and
//! the recorded fixture. The line-level diff exists purely to speed up
//! root-causing; it never changes the verdict.

use std::path::Path;

use tracing::debug;

use crate::common::{Error, Result};

/// Outcome of comparing a trace against its fixture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Mismatch(Divergence),
}

/// First line at which trace and fixture disagree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Divergence {
    pub line: usize,
    pub expected: String,
    pub actual: String,
}

/// Compare a captured trace file against its golden fixture.
///
/// A missing fixture or a missing trace file is a harness defect, not a
/// scenario result, and surfaces as an error instead of a verdict.
pub fn compare(trace: &Path, fixture: &Path) -> Result<Verdict> {
    if !fixture.exists() {
        return Err(Error::FixtureMissing(fixture.to_path_buf()));
    }
    if !trace.exists() {
        return Err(Error::TraceLost(trace.to_path_buf()));
    }

    let actual = std::fs::read(trace)?;
    let expected = std::fs::read(fixture)?;

    if actual.len() != expected.len() {
        // Not a failure determinant on its own, but worth mentioning
        debug!(
            "results are of different length ({} vs {} bytes)",
            actual.len(),
            expected.len()
        );
    }

    if actual == expected {
        return Ok(Verdict::Pass);
    }
    Ok(Verdict::Mismatch(first_divergence(&expected, &actual)))
}

fn first_divergence(expected: &[u8], actual: &[u8]) -> Divergence {
    let expected = String::from_utf8_lossy(expected);
    let actual = String::from_utf8_lossy(actual);
    let mut expected_lines = expected.lines();
    let mut actual_lines = actual.lines();
    let mut line = 0;
    loop {
        line += 1;
        match (expected_lines.next(), actual_lines.next()) {
            (Some(want), Some(got)) if want == got => continue,
            (want, got) => {
                return Divergence {
                    line,
                    expected: want.unwrap_or("").to_string(),
                    actual: got.unwrap_or("").to_string(),
                }
            }
        }
    }
}

/// Promote a captured trace to become the golden fixture.
///
/// Rename first; fall back to copy-and-delete when the fixture lives on a
/// different filesystem than the temp directory.
pub fn promote(trace: &Path, fixture: &Path) -> Result<()> {
    let fail = |reason: String| Error::Promote {
        src: trace.to_path_buf(),
        dst: fixture.to_path_buf(),
        reason,
    };

    if let Some(parent) = fixture.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| fail(e.to_string()))?;
        }
    }

    match std::fs::rename(trace, fixture) {
        Ok(()) => Ok(()),
        Err(err) => {
            debug!(
                "rename {} -> {} failed ({err}), copying instead",
                trace.display(),
                fixture.display()
            );
            std::fs::copy(trace, fixture).map_err(|e| fail(e.to_string()))?;
            let _ = std::fs::remove_file(trace);
            Ok(())
        }
    }
}

/// Translate a fixture line into a regular expression for wildcard
/// matching: `*` matches any sequence, `?` any single character, and a
/// whitespace run matches one-or-more whitespace. `[ ( . ] )` are taken
/// literally.
///
/// This is the building block for fuzzy fixtures whose exact bytes are
/// environment-dependent; the default verification path stays exact.
pub fn wildcard_pattern(line: &str) -> String {
    let mut pattern = String::with_capacity(line.len() + 8);
    pattern.push('^');
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '[' | '(' | '.' | ']' | ')' => {
                pattern.push('\\');
                pattern.push(c);
            }
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            c if c.is_whitespace() => {
                while chars.peek().map(|n| n.is_whitespace()).unwrap_or(false) {
                    chars.next();
                }
                pattern.push_str(r"\s+");
            }
            c => pattern.push(c),
        }
    }
    pattern.push('$');
    pattern
}

/// Match one captured line against a fixture line under the wildcard
/// rules. Lines the translation cannot express fall back to equality.
pub fn line_matches(fixture_line: &str, actual: &str) -> bool {
    match regex::Regex::new(&wildcard_pattern(fixture_line)) {
        Ok(re) => re.is_match(actual),
        Err(err) => {
            debug!("wildcard pattern failed to compile: {err}");
            fixture_line == actual
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_with(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    const RECORD: &str = "SRC=192.18.0.10\nDST=192.0.2.100\nID=0\nTTL=64\n\
                          DATA=TCP(sport=23, dport=4242, seq=0, ack=2, flags=AS, win=65535)\n\n";

    #[test]
    fn identical_files_pass() {
        let trace = temp_with(RECORD);
        let fixture = temp_with(RECORD);
        assert_eq!(
            compare(trace.path(), fixture.path()).unwrap(),
            Verdict::Pass
        );
    }

    #[test]
    fn single_field_difference_fails_exact_compare() {
        let trace = temp_with(&RECORD.replace("TTL=64", "TTL=255"));
        let fixture = temp_with(RECORD);
        match compare(trace.path(), fixture.path()).unwrap() {
            Verdict::Mismatch(divergence) => {
                assert_eq!(divergence.line, 4);
                assert_eq!(divergence.expected, "TTL=64");
                assert_eq!(divergence.actual, "TTL=255");
            }
            Verdict::Pass => panic!("TTL change must fail exact compare"),
        }
    }

    #[test]
    fn truncated_trace_diverges_at_missing_line() {
        let trace = temp_with("SRC=192.18.0.10\n");
        let fixture = temp_with("SRC=192.18.0.10\nDST=192.0.2.100\n");
        match compare(trace.path(), fixture.path()).unwrap() {
            Verdict::Mismatch(divergence) => {
                assert_eq!(divergence.line, 2);
                assert_eq!(divergence.expected, "DST=192.0.2.100");
                assert_eq!(divergence.actual, "");
            }
            Verdict::Pass => panic!("truncated trace must not pass"),
        }
    }

    #[test]
    fn missing_fixture_is_an_error_not_a_verdict() {
        let trace = temp_with(RECORD);
        let missing = trace.path().with_extension("nonexistent");
        assert!(matches!(
            compare(trace.path(), &missing),
            Err(Error::FixtureMissing(_))
        ));
    }

    #[test]
    fn missing_trace_is_an_error_not_a_verdict() {
        let fixture = temp_with(RECORD);
        let missing = fixture.path().with_extension("nonexistent");
        assert!(matches!(
            compare(&missing, fixture.path()),
            Err(Error::TraceLost(_))
        ));
    }

    #[test]
    fn promote_moves_trace_into_fixture_place() {
        let dir = tempfile::tempdir().unwrap();
        let trace = dir.path().join("trace");
        std::fs::write(&trace, RECORD).unwrap();
        let fixture = dir.path().join("fixtures/new.trace");

        promote(&trace, &fixture).unwrap();
        assert!(!trace.exists());
        assert_eq!(std::fs::read_to_string(&fixture).unwrap(), RECORD);
    }

    #[test]
    fn generated_fixture_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let trace = dir.path().join("trace");
        std::fs::write(&trace, RECORD).unwrap();
        let fixture = dir.path().join("round.trace");
        promote(&trace, &fixture).unwrap();

        let fresh = dir.path().join("fresh");
        std::fs::write(&fresh, RECORD).unwrap();
        assert_eq!(compare(&fresh, &fixture).unwrap(), Verdict::Pass);
    }

    #[test]
    fn wildcard_star_and_question_translate() {
        assert_eq!(wildcard_pattern("ID=*"), "^ID=.*$");
        assert_eq!(wildcard_pattern("TTL=6?"), "^TTL=6.$");
        assert!(line_matches("ID=*", "ID=48813"));
        assert!(line_matches("TTL=6?", "TTL=64"));
        assert!(!line_matches("TTL=6?", "TTL=128"));
    }

    #[test]
    fn wildcard_escapes_grouping_characters() {
        let fixture_line = "DATA=TCP(sport=23, dport=4242, seq=0, ack=2, flags=AS, win=65535)";
        assert!(line_matches(fixture_line, fixture_line));
        assert!(!line_matches(fixture_line, "DATA=TCPXsport=23Y"));
    }

    #[test]
    fn wildcard_collapses_whitespace_runs() {
        assert_eq!(wildcard_pattern("a  b"), r"^a\s+b$");
        assert!(line_matches("a  b", "a b"));
        assert!(line_matches("a b", "a \t b"));
        assert!(!line_matches("a b", "ab"));
    }
}
