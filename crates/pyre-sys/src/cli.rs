//! Command-line parsing. Unknown flags warn and are skipped.

use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    pub headless: bool,
    pub frames: u32,
    pub output_dir: PathBuf,
    pub width: u32,
    pub height: u32,
    pub validation: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            headless: false,
            frames: 3,
            output_dir: PathBuf::from("out"),
            width: 1280,
            height: 720,
            validation: cfg!(debug_assertions),
        }
    }
}

/// Parse everything after argv[0].
pub fn parse(args: &[String]) -> Options {
    let mut opts = Options::default();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--headless" | "-H" => opts.headless = true,
            "--frames" | "-f" => {
                if let Some(v) = iter.next().and_then(|s| s.parse().ok()) {
                    opts.frames = v;
                } else {
                    log::warn!("{} needs a frame count", arg);
                }
            }
            "--output-dir" | "-o" => {
                if let Some(v) = iter.next() {
                    opts.output_dir = PathBuf::from(v);
                } else {
                    log::warn!("{} needs a path", arg);
                }
            }
            "--width" => {
                if let Some(v) = iter.next().and_then(|s| s.parse().ok()) {
                    opts.width = v;
                } else {
                    log::warn!("--width needs a pixel count");
                }
            }
            "--height" => {
                if let Some(v) = iter.next().and_then(|s| s.parse().ok()) {
                    opts.height = v;
                } else {
                    log::warn!("--height needs a pixel count");
                }
            }
            "--no-validation" => opts.validation = false,
            other => log::warn!("ignoring unknown argument {:?}", other),
        }
    }

    opts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_defaults() {
        let opts = parse(&[]);
        assert!(!opts.headless);
        assert_eq!(opts.frames, 3);
        assert_eq!(opts.output_dir, PathBuf::from("out"));
        assert_eq!((opts.width, opts.height), (1280, 720));
    }

    #[test]
    fn test_headless_capture_run() {
        let opts = parse(&args(&["--headless", "--frames", "3", "--output-dir", "caps"]));
        assert!(opts.headless);
        assert_eq!(opts.frames, 3);
        assert_eq!(opts.output_dir, PathBuf::from("caps"));
    }

    #[test]
    fn test_short_forms() {
        let opts = parse(&args(&["-H", "-f", "12", "-o", "x"]));
        assert!(opts.headless);
        assert_eq!(opts.frames, 12);
        assert_eq!(opts.output_dir, PathBuf::from("x"));
    }

    #[test]
    fn test_size_and_validation() {
        let opts = parse(&args(&["--width", "640", "--height", "480", "--no-validation"]));
        assert_eq!((opts.width, opts.height), (640, 480));
        assert!(!opts.validation);
    }

    #[test]
    fn test_unknown_flags_are_skipped() {
        let opts = parse(&args(&["--bogus", "-H"]));
        assert!(opts.headless);
    }

    #[test]
    fn test_missing_value_keeps_default() {
        let opts = parse(&args(&["--frames"]));
        assert_eq!(opts.frames, 3);
    }
}
