//! Output device discovery and selection over CPAL.

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// First output device whose name contains `needle` (case-insensitive), or
/// the host default.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    if let Some(needle) = needle {
        let mut devices = host.output_devices().context("No output devices")?;
        return devices
            .find(|d| {
                d.description()
                    .map(|desc| matches_device_name(&desc.name(), needle))
                    .unwrap_or(false)
            })
            .ok_or_else(|| anyhow!("No output device matched: {needle}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("No default output device"))
}

/// Best supported output config for a media sample rate.
///
/// Prefers the exact rate, then the highest rate below it, then the lowest
/// above it. Ties go to the better sample format.
pub fn pick_output_config(
    device: &cpal::Device,
    target_rate: Option<u32>,
) -> Result<cpal::SupportedStreamConfig> {
    let mut best: Option<(Candidate, cpal::SupportedStreamConfig)> = None;
    for range in device.supported_output_configs()? {
        let rate = rate_in_range(range.min_sample_rate(), range.max_sample_rate(), target_rate);
        let candidate = Candidate {
            below: target_rate.map(|t| rate <= t).unwrap_or(true),
            rate,
            format_rank: sample_format_rank(range.sample_format()),
        };
        if best
            .as_ref()
            .map(|(b, _)| candidate.beats(b))
            .unwrap_or(true)
        {
            best = Some((candidate, range.with_sample_rate(rate)));
        }
    }
    best.map(|(_, cfg)| cfg)
        .ok_or_else(|| anyhow!("No supported output configs"))
}

/// Largest fixed buffer the device allows, capped to keep latency sane.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    const MAX_FRAMES: u32 = 16_384;
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            Some(cpal::BufferSize::Fixed((*max).min(MAX_FRAMES).max(*min)))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

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
    fn beats(&self, other: &Candidate) -> bool {
        if self.below != other.below {
            self.below
        } else if self.rate != other.rate {
            // Below the target the closest is the highest; above it, the lowest.
            (self.rate > other.rate) == self.below
        } else {
            self.format_rank < other.format_rank
        }
    }
}

fn rate_in_range(min: u32, max: u32, target_rate: Option<u32>) -> u32 {
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
    !needle.is_empty() && name.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_name_match_is_case_insensitive() {
        assert!(matches_device_name("USB DAC", "dac"));
        assert!(!matches_device_name("USB DAC", "speaker"));
        assert!(!matches_device_name("USB DAC", "  "));
    }

    #[test]
    fn rate_clamps_to_range() {
        assert_eq!(rate_in_range(44_100, 96_000, Some(48_000)), 48_000);
        assert_eq!(rate_in_range(44_100, 96_000, Some(22_050)), 44_100);
        assert_eq!(rate_in_range(44_100, 96_000, Some(192_000)), 96_000);
        assert_eq!(rate_in_range(44_100, 96_000, None), 96_000);
    }

    #[test]
    fn candidates_prefer_below_then_rate_then_format() {
        let base = Candidate {
            below: false,
            rate: 96_000,
            format_rank: 0,
        };
        let below = Candidate {
            below: true,
            rate: 44_100,
            format_rank: 2,
        };
        assert!(below.beats(&base));
        let higher = Candidate {
            rate: 48_000,
            ..below
        };
        assert!(higher.beats(&below));
        let better_format = Candidate {
            format_rank: 0,
            ..below
        };
        assert!(better_format.beats(&below));
        assert!(!below.beats(&below));

        let closer_above = Candidate {
            rate: 48_000,
            ..base
        };
        assert!(closer_above.beats(&base));
    }
}
