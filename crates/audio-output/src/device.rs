//! Output device and stream config selection.

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// First output device whose name contains `needle` (case-insensitive), or the default one.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    if let Some(needle) = needle {
        let found = host
            .output_devices()
            .context("No output devices")?
            .find(|d| {
                d.description()
                    .ok()
                    .is_some_and(|n| matches_device_name(&n.name(), needle))
            });
        return found.ok_or_else(|| anyhow!("No output device matched: {needle}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("No default output device"))
}

/// Choose an output config for `target_rate`, or the device's best one when unset.
///
/// With a target, the highest supported rate at or below it wins; failing that, the lowest
/// rate above it. Float sample formats are preferred on ties.
pub fn pick_output_config(
    device: &cpal::Device,
    target_rate: Option<u32>,
) -> Result<cpal::SupportedStreamConfig> {
    let mut best: Option<(Candidate, cpal::SupportedStreamConfig)> = None;

    for range in device
        .supported_output_configs()
        .context("query output configs")?
    {
        let rate = pick_rate_for_range(range.min_sample_rate(), range.max_sample_rate(), target_rate);
        let candidate = Candidate {
            below: target_rate.is_none_or(|t| rate <= t),
            rate,
            format_rank: sample_format_rank(range.sample_format()),
        };
        if best.as_ref().is_none_or(|(b, _)| candidate.is_better_than(b)) {
            best = Some((candidate, range.with_sample_rate(rate)));
        }
    }

    best.map(|(_, cfg)| cfg)
        .ok_or_else(|| anyhow!("No supported output configs"))
}

/// Prefer a fixed, reasonably large buffer to reduce underruns.
///
/// Returns `None` when the device does not report a range.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    const MAX_FRAMES: u32 = 16_384;
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            Some(cpal::BufferSize::Fixed((*max).min(MAX_FRAMES).max(*min)))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Print output devices for `--list-devices`.
pub fn list_devices(host: &cpal::Host) -> Result<()> {
    let devices = host.output_devices().context("No output devices")?;
    for (i, d) in devices.enumerate() {
        println!("#{i}: {}", d.description()?);
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Candidate {
    below: bool,
    rate: u32,
    format_rank: u8,
}

impl Candidate {
    fn is_better_than(&self, best: &Candidate) -> bool {
        if self.below != best.below {
            self.below
        } else if self.rate != best.rate {
            if self.below {
                self.rate > best.rate
            } else {
                self.rate < best.rate
            }
        } else {
            self.format_rank < best.format_rank
        }
    }
}

fn pick_rate_for_range(min: u32, max: u32, target_rate: Option<u32>) -> u32 {
    match target_rate {
        Some(target) => target.clamp(min, max.max(min)),
        None => max,
    }
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(below: bool, rate: u32, format_rank: u8) -> Candidate {
        Candidate {
            below,
            rate,
            format_rank,
        }
    }

    #[test]
    fn matches_device_name_is_case_insensitive() {
        assert!(matches_device_name("USB DAC", "dac"));
        assert!(matches_device_name("usb dac", "USB"));
        assert!(!matches_device_name("USB DAC", "speaker"));
        assert!(!matches_device_name("USB DAC", "  "));
    }

    #[test]
    fn rate_is_clamped_into_range() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(48_000)), 48_000);
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(16_000)), 44_100);
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(192_000)), 96_000);
        assert_eq!(pick_rate_for_range(44_100, 96_000, None), 96_000);
    }

    #[test]
    fn candidates_at_or_below_target_win() {
        assert!(candidate(true, 44_100, 2).is_better_than(&candidate(false, 48_000, 0)));
        assert!(candidate(true, 48_000, 2).is_better_than(&candidate(true, 44_100, 2)));
        assert!(candidate(false, 32_000, 2).is_better_than(&candidate(false, 44_100, 2)));
        assert!(candidate(true, 48_000, 0).is_better_than(&candidate(true, 48_000, 2)));
        assert!(!candidate(true, 48_000, 2).is_better_than(&candidate(true, 48_000, 2)));
    }
}
