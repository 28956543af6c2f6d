//! Audio transcoding and waveform rendering through the ffmpeg binary.

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

/// Amount of ffmpeg's stderr kept in a failure.
const STDERR_TAIL_CHARS: usize = 500;
const FLAC_COMPRESSION_LEVEL: &str = "12";
const WAVEFORM_FILTER: &str = "showwavespic=s=1200x240:colors=#4f46e5";

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("ffmpeg is not available: {0}")]
    NotAvailable(String),

    #[error("ffmpeg failed ({status}): {stderr}")]
    Failed { status: String, stderr: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    Wav,
    Flac,
}

impl TargetFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            TargetFormat::Wav => "wav",
            TargetFormat::Flac => "flac",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wav" | "wave" => Some(TargetFormat::Wav),
            "flac" => Some(TargetFormat::Flac),
            _ => None,
        }
    }
}

/// PCM parameters for WAV output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WavOptions {
    pub bit_depth: u16,
    pub sample_rate: u32,
}

impl Default for WavOptions {
    fn default() -> Self {
        Self {
            bit_depth: 16,
            sample_rate: 44_100,
        }
    }
}

impl WavOptions {
    fn codec(&self) -> Result<String, ConversionError> {
        match self.bit_depth {
            16 | 24 | 32 => Ok(format!("pcm_s{}le", self.bit_depth)),
            other => Err(ConversionError::UnsupportedFormat(format!(
                "{}-bit WAV",
                other
            ))),
        }
    }
}

/// Last `n` characters of `text`.
fn tail_chars(text: &str, n: usize) -> String {
    let count = text.chars().count();
    text.chars().skip(count.saturating_sub(n)).collect()
}

pub struct AudioConverter {
    ffmpeg: PathBuf,
    wav: WavOptions,
}

impl Default for AudioConverter {
    fn default() -> Self {
        Self::new("ffmpeg", WavOptions::default())
    }
}

impl AudioConverter {
    pub fn new(ffmpeg: impl Into<PathBuf>, wav: WavOptions) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            wav,
        }
    }

    /// Whether `ffmpeg -version` runs and exits cleanly. A missing binary is
    /// simply `false`.
    pub async fn is_available(&self) -> bool {
        self.check_available().await.is_ok()
    }

    pub async fn check_available(&self) -> Result<(), ConversionError> {
        let status = Command::new(&self.ffmpeg)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| {
                ConversionError::NotAvailable(format!("{}: {}", self.ffmpeg.display(), e))
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(ConversionError::NotAvailable(format!(
                "{} -version exited with {}",
                self.ffmpeg.display(),
                status
            )))
        }
    }

    /// ffmpeg arguments converting `input` to `output` in `format`.
    pub fn build_args(
        &self,
        input: &Path,
        output: &Path,
        format: TargetFormat,
    ) -> Result<Vec<OsString>, ConversionError> {
        let mut args: Vec<OsString> = vec!["-hide_banner".into(), "-i".into(), input.into()];
        args.push("-vn".into());
        match format {
            TargetFormat::Wav => {
                args.extend(["-acodec".into(), self.wav.codec()?.into()]);
                args.extend(["-ar".into(), self.wav.sample_rate.to_string().into()]);
            }
            TargetFormat::Flac => {
                args.extend(["-c:a".into(), "flac".into()]);
                args.extend(["-compression_level".into(), FLAC_COMPRESSION_LEVEL.into()]);
            }
        }
        args.push("-y".into());
        args.push(output.into());
        Ok(args)
    }

    async fn run(&self, args: Vec<OsString>) -> Result<(), ConversionError> {
        debug!(ffmpeg = %self.ffmpeg.display(), ?args, "Running ffmpeg");
        let output = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ConversionError::NotAvailable(self.ffmpeg.display().to_string())
                } else {
                    ConversionError::Io(e)
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ConversionError::Failed {
                status: output.status.to_string(),
                stderr: tail_chars(stderr.trim_end(), STDERR_TAIL_CHARS),
            });
        }
        Ok(())
    }

    pub async fn convert(
        &self,
        input: &Path,
        output: &Path,
        format: TargetFormat,
    ) -> Result<(), ConversionError> {
        if !tokio::fs::try_exists(input).await? {
            return Err(ConversionError::InvalidInput(format!(
                "{} does not exist",
                input.display()
            )));
        }
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let args = self.build_args(input, output, format)?;
        self.run(args).await?;
        info!(input = %input.display(), output = %output.display(), format = format.extension(), "Audio converted");
        Ok(())
    }

    /// Convert next to the input file, swapping the extension.
    pub async fn convert_alongside(
        &self,
        input: &Path,
        format: TargetFormat,
    ) -> Result<PathBuf, ConversionError> {
        let output = input.with_extension(format.extension());
        if output == input {
            return Err(ConversionError::InvalidInput(format!(
                "{} is already {}",
                input.display(),
                format.extension()
            )));
        }
        self.convert(input, &output, format).await?;
        Ok(output)
    }

    /// Render a PNG waveform picture of `input`.
    pub async fn render_waveform(&self, input: &Path, output: &Path) -> Result<(), ConversionError> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let args: Vec<OsString> = vec![
            "-hide_banner".into(),
            "-i".into(),
            input.into(),
            "-filter_complex".into(),
            WAVEFORM_FILTER.into(),
            "-frames:v".into(),
            "1".into(),
            "-y".into(),
            output.into(),
        ];
        self.run(args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().to_string()).collect()
    }

    #[test]
    fn test_wav_args() {
        let converter = AudioConverter::new(
            "ffmpeg",
            WavOptions {
                bit_depth: 24,
                sample_rate: 48_000,
            },
        );
        let args = converter
            .build_args(Path::new("in.mp3"), Path::new("out.wav"), TargetFormat::Wav)
            .unwrap();
        let args = strings(&args);
        assert!(args.windows(2).any(|w| w == ["-acodec", "pcm_s24le"]));
        assert!(args.windows(2).any(|w| w == ["-ar", "48000"]));
        assert_eq!(args[args.len() - 2], "-y");
        assert_eq!(args.last().unwrap(), "out.wav");
    }

    #[test]
    fn test_flac_args() {
        let args = AudioConverter::default()
            .build_args(Path::new("in.mp3"), Path::new("out.flac"), TargetFormat::Flac)
            .unwrap();
        let args = strings(&args);
        assert!(args.windows(2).any(|w| w == ["-c:a", "flac"]));
        assert!(args.windows(2).any(|w| w == ["-compression_level", "12"]));
        assert!(args.contains(&"-y".to_string()));
    }

    #[test]
    fn test_unsupported_bit_depth() {
        let converter = AudioConverter::new(
            "ffmpeg",
            WavOptions {
                bit_depth: 8,
                sample_rate: 44_100,
            },
        );
        assert!(matches!(
            converter.build_args(Path::new("a"), Path::new("b"), TargetFormat::Wav),
            Err(ConversionError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_tail_chars() {
        assert_eq!(tail_chars("abcdef", 3), "def");
        assert_eq!(tail_chars("ab", 3), "ab");
        assert_eq!(tail_chars("ééé", 2), "éé");
    }

    #[tokio::test]
    async fn test_missing_binary_is_not_available() {
        let converter = AudioConverter::new("/nonexistent/ffmpeg-binary", WavOptions::default());
        assert!(!converter.is_available().await);

        let dir = tempfile::TempDir::new().unwrap();
        let input = dir.path().join("in.mp3");
        std::fs::write(&input, b"x").unwrap();
        let err = converter
            .convert(&input, &dir.path().join("out.wav"), TargetFormat::Wav)
            .await
            .unwrap_err();
        assert!(matches!(err, ConversionError::NotAvailable(_)));
    }

    /// Runs every fake-ffmpeg scenario in one test so no other test forks
    /// while a script is open for writing.
    #[cfg(unix)]
    #[tokio::test]
    async fn test_with_fake_ffmpeg() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let write_script = |name: &str, body: &str| {
            let path = dir.path().join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        };

        // Writes its argument list to the last argument.
        let ok = write_script(
            "ffmpeg-ok",
            "[ \"$1\" = \"-version\" ] && exit 0\nfor last; do :; done\necho \"$@\" > \"$last\"",
        );
        let failing = write_script(
            "ffmpeg-fail",
            "i=0; while [ $i -lt 200 ]; do printf 'noise-%03d ' $i >&2; i=$((i+1)); done\necho 'Invalid data found' >&2\nexit 1",
        );

        let converter = AudioConverter::new(&ok, WavOptions::default());
        assert!(converter.is_available().await);

        let input = dir.path().join("song.mp3");
        std::fs::write(&input, b"ID3").unwrap();
        let output = converter
            .convert_alongside(&input, TargetFormat::Flac)
            .await
            .unwrap();
        assert_eq!(output, dir.path().join("song.flac"));
        let recorded = std::fs::read_to_string(&output).unwrap();
        assert!(recorded.contains("-compression_level 12"));

        let waveform = dir.path().join("waveforms").join("w.png");
        converter.render_waveform(&input, &waveform).await.unwrap();
        assert!(std::fs::read_to_string(&waveform)
            .unwrap()
            .contains("showwavespic"));

        let converter = AudioConverter::new(&failing, WavOptions::default());
        match converter
            .convert(&input, &dir.path().join("out.wav"), TargetFormat::Wav)
            .await
        {
            Err(ConversionError::Failed { stderr, .. }) => {
                assert_eq!(stderr.chars().count(), STDERR_TAIL_CHARS);
                assert!(stderr.ends_with("Invalid data found"));
            }
            other => panic!("expected failure, got {:?}", other),
        }

        assert!(matches!(
            converter
                .convert_alongside(&dir.path().join("song.wav"), TargetFormat::Wav)
                .await,
            Err(ConversionError::InvalidInput(_))
        ));
    }
}
