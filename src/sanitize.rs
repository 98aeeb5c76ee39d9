use std::time::Duration;

use anyhow::{Result, bail};
use regex::Regex;

/// Fallback settle time when the raw value is out of range or not an integer.
const FALLBACK_WAIT: Duration = Duration::from_millis(5000);

/// Output image format accepted by `Page.captureScreenshot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
    Webp,
}

impl ImageFormat {
    /// The CDP format string, doubling as the file extension.
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Webp => "webp",
        }
    }

    /// The matching `image` crate format for re-encoding after a trim.
    pub fn encoder_format(&self) -> image::ImageFormat {
        match self {
            ImageFormat::Png => image::ImageFormat::Png,
            ImageFormat::Jpeg => image::ImageFormat::Jpeg,
            ImageFormat::Webp => image::ImageFormat::WebP,
        }
    }
}

/// HTTP credentials extracted from a `username:password` option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Trims the URL and prepends `http://` when no scheme is present.
/// The scheme check is case-insensitive; the rest of the URL is passed
/// through untouched.
pub fn sanitize_url(raw: &str) -> String {
    let url = raw.trim();
    let lower = url.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        url.to_string()
    } else {
        format!("http://{url}")
    }
}

/// Converts a seconds value in [1,600] to a settle duration, 5s otherwise.
pub fn sanitize_time(raw: &str) -> Duration {
    match raw.trim().parse::<i64>() {
        Ok(secs) if (1..=600).contains(&secs) => Duration::from_secs(secs as u64),
        _ => FALLBACK_WAIT,
    }
}

/// Clip origin x, bounded to [0,1920], fallback 0.
pub fn sanitize_x(raw: &str) -> u32 {
    bounded(raw, 0, 1920, 0)
}

/// Clip origin y, bounded to [0,1080], fallback 0.
pub fn sanitize_y(raw: &str) -> u32 {
    bounded(raw, 0, 1080, 0)
}

/// Clip width, bounded to [1,1920], fallback 1920.
pub fn sanitize_width(raw: &str) -> u32 {
    bounded(raw, 1, 1920, 1920)
}

/// Clip height, bounded to [1,1080], fallback 1080.
pub fn sanitize_height(raw: &str) -> u32 {
    bounded(raw, 1, 1080, 1080)
}

fn bounded(raw: &str, min: i64, max: i64, fallback: u32) -> u32 {
    match raw.trim().parse::<i64>() {
        Ok(n) if n >= min && n <= max => n as u32,
        _ => fallback,
    }
}

/// Resolves the output base path and image format.
///
/// An unset `raw_out` derives the base path from the last non-empty URL
/// segment and defaults to png. A set `raw_out` must end with one of the
/// accepted extensions (`jpg` aliases to `jpeg`); anything else is the one
/// sanitizer error, since no safe default exists for a deliberately chosen
/// but malformed filename. `want_temp` appends the temp-file marker.
pub fn sanitize_output(
    url: &str,
    want_temp: bool,
    raw_out: Option<&str>,
) -> Result<(String, ImageFormat)> {
    let mut format = ImageFormat::Png;
    let mut base = match raw_out {
        Some(out) => {
            let re = Regex::new(r"(?i)\.(png|jpg|jpeg|webp)$")?;
            let Some(m) = re.captures(out) else {
                bail!("output file \"{out}\" must end with .png, .jpg, .jpeg or .webp");
            };
            format = match m[1].to_ascii_lowercase().as_str() {
                "jpg" | "jpeg" => ImageFormat::Jpeg,
                "webp" => ImageFormat::Webp,
                _ => ImageFormat::Png,
            };
            out[..out.len() - m[0].len()].to_string()
        }
        None => {
            let sections: Vec<&str> = url.split('/').collect();
            let back = if url.ends_with('/') { 2 } else { 1 };
            sections
                .len()
                .checked_sub(back)
                .and_then(|i| sections.get(i))
                .unwrap_or(&"screenshot")
                .to_string()
        }
    };
    if want_temp {
        base.push_str("_tmp");
    }
    Ok((base, format))
}

/// Accepts credentials only in `username:password` form with exactly one
/// colon and both sides non-empty; anything else is silently dropped.
pub fn sanitize_auth(raw: &str) -> Option<Credentials> {
    let (username, password) = raw.split_once(':')?;
    if username.is_empty() || password.is_empty() || password.contains(':') {
        return None;
    }
    Some(Credentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_gains_scheme_when_missing() {
        assert_eq!(sanitize_url("example.com"), "http://example.com");
        assert_eq!(sanitize_url("  example.com  "), "http://example.com");
    }

    #[test]
    fn url_scheme_check_is_case_insensitive() {
        assert_eq!(sanitize_url("https://example.com/"), "https://example.com/");
        assert_eq!(
            sanitize_url("HTTPS://Example.com/"),
            "HTTPS://Example.com/"
        );
    }

    #[test]
    fn time_in_range_converts_to_seconds() {
        assert_eq!(sanitize_time("1"), Duration::from_secs(1));
        assert_eq!(sanitize_time("600"), Duration::from_secs(600));
    }

    #[test]
    fn time_out_of_range_falls_back() {
        for raw in ["0", "601", "-3", "2.5", "abc", ""] {
            assert_eq!(sanitize_time(raw), Duration::from_millis(5000), "{raw}");
        }
    }

    #[test]
    fn coordinates_bounded_with_zero_fallback() {
        assert_eq!(sanitize_x("0"), 0);
        assert_eq!(sanitize_x("1920"), 1920);
        assert_eq!(sanitize_x("1921"), 0);
        assert_eq!(sanitize_x("-1"), 0);
        assert_eq!(sanitize_y("1080"), 1080);
        assert_eq!(sanitize_y("1081"), 0);
        assert_eq!(sanitize_y("nope"), 0);
    }

    #[test]
    fn dimensions_bounded_with_max_fallback() {
        assert_eq!(sanitize_width("800"), 800);
        assert_eq!(sanitize_width("0"), 1920);
        assert_eq!(sanitize_width("1921"), 1920);
        assert_eq!(sanitize_height("600"), 600);
        assert_eq!(sanitize_height("0"), 1080);
        assert_eq!(sanitize_height("9999"), 1080);
    }

    #[test]
    fn output_derived_from_url_drops_trailing_slash() {
        let (base, format) = sanitize_output("http://a.com/page/", false, None).unwrap();
        assert_eq!(base, "page");
        assert_eq!(format, ImageFormat::Png);
    }

    #[test]
    fn output_derived_from_url_takes_last_segment() {
        let (base, _) = sanitize_output("http://a.com/x/shot", false, None).unwrap();
        assert_eq!(base, "shot");
        let (base, _) = sanitize_output("http://a.com", false, None).unwrap();
        assert_eq!(base, "a.com");
    }

    #[test]
    fn output_jpg_aliases_to_jpeg() {
        let (base, format) = sanitize_output("http://a.com", false, Some("shot.jpg")).unwrap();
        assert_eq!(base, "shot");
        assert_eq!(format, ImageFormat::Jpeg);
    }

    #[test]
    fn output_extension_matched_case_insensitively() {
        let (base, format) = sanitize_output("http://a.com", false, Some("Shot.PNG")).unwrap();
        assert_eq!(base, "Shot");
        assert_eq!(format, ImageFormat::Png);
        let (_, format) = sanitize_output("http://a.com", false, Some("s.WebP")).unwrap();
        assert_eq!(format, ImageFormat::Webp);
    }

    #[test]
    fn output_unknown_extension_is_an_error() {
        assert!(sanitize_output("http://a.com", false, Some("shot.txt")).is_err());
        assert!(sanitize_output("http://a.com", false, Some("shot")).is_err());
    }

    #[test]
    fn temp_marker_appended_on_request() {
        let (base, _) = sanitize_output("http://a.com/page", true, None).unwrap();
        assert_eq!(base, "page_tmp");
        let (base, _) = sanitize_output("http://a.com", true, Some("shot.webp")).unwrap();
        assert_eq!(base, "shot_tmp");
    }

    #[test]
    fn auth_accepts_single_colon_pair() {
        assert_eq!(
            sanitize_auth("bob:secret"),
            Some(Credentials {
                username: "bob".to_string(),
                password: "secret".to_string(),
            })
        );
    }

    #[test]
    fn auth_rejects_malformed_input() {
        assert_eq!(sanitize_auth("bob:sec:ret"), None);
        assert_eq!(sanitize_auth("bobsecret"), None);
        assert_eq!(sanitize_auth(":secret"), None);
        assert_eq!(sanitize_auth("bob:"), None);
    }
}
