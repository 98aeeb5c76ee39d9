use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::debug;

use crate::sanitize::{
    self, Credentials, ImageFormat, sanitize_height, sanitize_time, sanitize_url, sanitize_width,
    sanitize_x, sanitize_y,
};

/// Default raw values applied when a flag is absent, before sanitization.
pub const DEFAULT_TIME: &str = "3";
pub const DEFAULT_X: &str = "0";
pub const DEFAULT_Y: &str = "0";
pub const DEFAULT_WIDTH: &str = "1920";
pub const DEFAULT_HEIGHT: &str = "1080";

/// Raw option strings as they arrive from the CLI or one batch line.
/// Both modes feed this same shape through the sanitizer.
#[derive(Debug, Clone)]
pub struct RawOptions {
    pub url: String,
    pub time: String,
    pub x: String,
    pub y: String,
    pub width: String,
    pub height: String,
    pub out: Option<String>,
    pub crop: bool,
    pub auth: Option<String>,
}

/// A fully resolved screenshot: constructed once, consumed once by the
/// capture loop, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureJob {
    pub url: String,
    pub wait: Duration,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub out_base: String,
    pub tmp_base: String,
    pub format: ImageFormat,
    pub crop: bool,
    pub auth: Option<Credentials>,
}

impl CaptureJob {
    /// Builds a job by running every raw option through its sanitizer.
    /// The only failure is an explicitly chosen output name with an
    /// unrecognized extension.
    pub fn resolve(opts: &RawOptions) -> Result<Self> {
        let url = sanitize_url(&opts.url);
        let out = opts.out.as_deref();
        let (out_base, format) = sanitize::sanitize_output(&url, false, out)?;
        let (tmp_base, _) = sanitize::sanitize_output(&url, true, out)?;

        Ok(Self {
            wait: sanitize_time(&opts.time),
            x: sanitize_x(&opts.x),
            y: sanitize_y(&opts.y),
            width: sanitize_width(&opts.width),
            height: sanitize_height(&opts.height),
            out_base,
            tmp_base,
            format,
            crop: opts.crop,
            auth: opts.auth.as_deref().and_then(sanitize::sanitize_auth),
            url,
        })
    }

    /// Final output file, base path plus extension.
    pub fn out_file(&self) -> String {
        format!("{}.{}", self.out_base, self.format.as_str())
    }

    /// Temp file written by the capture step before post-processing.
    pub fn tmp_file(&self) -> String {
        format!("{}.{}", self.tmp_base, self.format.as_str())
    }
}

/// Reads a batch file and resolves one job per usable line.
///
/// A missing file is fatal. Blank lines and `#` comments are skipped, and
/// lines without a URL flag are dropped without aborting the rest.
pub fn parse_batch_file(path: &Path) -> Result<Vec<CaptureJob>> {
    if !path.exists() {
        bail!("batch file \"{}\" does not exist", path.display());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read batch file \"{}\"", path.display()))?;

    let mut jobs = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(job) = parse_batch_line(line)? {
            jobs.push(job);
        }
    }
    Ok(jobs)
}

/// Tokenizes one batch line into the shared raw-option shape and resolves
/// it. Returns `Ok(None)` when the line carries no URL flag.
///
/// Flags are located by exact match against their short and long spellings.
/// Earlier revisions matched by prefix, which let `-t` swallow unrelated
/// tokens sharing a first letter.
pub fn parse_batch_line(line: &str) -> Result<Option<CaptureJob>> {
    let tokens: Vec<&str> = line.split_whitespace().collect();

    let Some(url) = flag_value(&tokens, "-u", "--url") else {
        debug!(line, "no URL flag in batch line, skipping");
        return Ok(None);
    };

    let opts = RawOptions {
        url: url.to_string(),
        time: flag_value(&tokens, "-t", "--time")
            .unwrap_or(DEFAULT_TIME)
            .to_string(),
        x: flag_value(&tokens, "-x", "--x")
            .unwrap_or(DEFAULT_X)
            .to_string(),
        y: flag_value(&tokens, "-y", "--y")
            .unwrap_or(DEFAULT_Y)
            .to_string(),
        width: flag_value(&tokens, "-w", "--width")
            .unwrap_or(DEFAULT_WIDTH)
            .to_string(),
        height: flag_value(&tokens, "-h", "--height")
            .unwrap_or(DEFAULT_HEIGHT)
            .to_string(),
        out: flag_value(&tokens, "-o", "--out").map(str::to_string),
        crop: tokens.iter().any(|t| *t == "-c" || *t == "--crop"),
        auth: flag_value(&tokens, "-a", "--auth").map(str::to_string),
    };

    CaptureJob::resolve(&opts).map(Some)
}

/// The token immediately following an exact short or long flag spelling,
/// if both the flag and a value token are present.
fn flag_value<'a>(tokens: &[&'a str], short: &str, long: &str) -> Option<&'a str> {
    tokens
        .iter()
        .position(|t| *t == short || *t == long)
        .and_then(|i| tokens.get(i + 1))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn resolve_line(line: &str) -> CaptureJob {
        parse_batch_line(line).unwrap().expect("line yields a job")
    }

    #[test]
    fn line_with_overrides_resolves() {
        let job = resolve_line("-u example.com -w 800 -h 600 --crop");
        assert_eq!(job.url, "http://example.com");
        assert_eq!(job.width, 800);
        assert_eq!(job.height, 600);
        assert!(job.crop);
        assert_eq!(job.wait, Duration::from_secs(3));
        assert_eq!(job.x, 0);
        assert_eq!(job.y, 0);
        assert_eq!(job.out_base, "example.com");
        assert_eq!(job.format, ImageFormat::Png);
        assert_eq!(job.auth, None);
    }

    #[test]
    fn line_without_url_yields_no_job() {
        assert_eq!(parse_batch_line("-w 800 -h 600").unwrap(), None);
    }

    #[test]
    fn long_spellings_accepted() {
        let job = resolve_line("--url example.com --time 10 --width 640 --out shot.webp");
        assert_eq!(job.wait, Duration::from_secs(10));
        assert_eq!(job.width, 640);
        assert_eq!(job.out_base, "shot");
        assert_eq!(job.format, ImageFormat::Webp);
    }

    #[test]
    fn flags_matched_exactly_not_by_prefix() {
        // "-ti" and "-wide" must not be mistaken for "-t" or "-w".
        let job = resolve_line("-u example.com -ti 9 -wide 50");
        assert_eq!(job.wait, Duration::from_secs(3));
        assert_eq!(job.width, 1920);
    }

    #[test]
    fn malformed_fields_degrade_to_fallbacks() {
        let job = resolve_line("-u example.com -t 9999 -x nope -h -5");
        assert_eq!(job.wait, Duration::from_millis(5000));
        assert_eq!(job.x, 0);
        assert_eq!(job.height, 1080);
    }

    #[test]
    fn trailing_flag_without_value_uses_default() {
        let job = resolve_line("-u example.com -w");
        assert_eq!(job.width, 1920);
    }

    #[test]
    fn auth_flag_resolves_credentials() {
        let job = resolve_line("-u example.com -a bob:secret");
        let auth = job.auth.expect("credentials present");
        assert_eq!(auth.username, "bob");
        assert_eq!(auth.password, "secret");

        let job = resolve_line("-u example.com -a bob:sec:ret");
        assert_eq!(job.auth, None);
    }

    #[test]
    fn invalid_output_extension_is_fatal() {
        assert!(parse_batch_line("-u example.com -o shot.txt").is_err());
    }

    #[test]
    fn tmp_and_out_paths_share_extension() {
        let job = resolve_line("-u example.com -o shot.png -c");
        assert_eq!(job.out_file(), "shot.png");
        assert_eq!(job.tmp_file(), "shot_tmp.png");
    }

    #[test]
    fn batch_file_skips_comments_and_blanks() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# comment").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "-u example.com -w 800").unwrap();
        writeln!(file, "-w 640").unwrap();
        writeln!(file, "-u other.org --crop").unwrap();

        let jobs = parse_batch_file(file.path()).unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].url, "http://example.com");
        assert_eq!(jobs[0].width, 800);
        assert_eq!(jobs[1].url, "http://other.org");
        assert!(jobs[1].crop);
    }

    #[test]
    fn batch_file_of_only_comments_yields_zero_jobs() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# one").unwrap();
        writeln!(file, "# two").unwrap();
        assert!(parse_batch_file(file.path()).unwrap().is_empty());
    }

    #[test]
    fn missing_batch_file_is_an_error() {
        assert!(parse_batch_file(Path::new("/no/such/batch.txt")).is_err());
    }
}
