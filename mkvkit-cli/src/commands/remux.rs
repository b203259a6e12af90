//! Remux command: read packets from existing files and assemble new ones.

use crate::{format_duration, format_size, OutputMode};
use anyhow::{anyhow, Context};
use clap::Args;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use mkvkit_core::{HackFlags, MuxSession, Packetizer};
use mkvkit_matroska::elements::{DEFAULT_DURATION, DURATION, TRACK_ENTRY, TRACK_NUMBER};
use mkvkit_matroska::{
    AssemblerConfig, ClusterAssembler, CueStrategy, FileOutputFactory, MatroskaReader, MuxStats,
    OutputFactory, SegmentIo, SegmentTemplate, SplitPoint, TrackOptions,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::Status;

/// Remux one or more Matroska files.
#[derive(Args, Debug)]
pub struct CmdRemux {
    /// Input files; later files are appended to the first
    #[arg(required = true, value_name = "INPUT")]
    pub inputs: Vec<PathBuf>,

    /// Output file path (numbered `-001`, `-002`, ... when splitting)
    #[arg(short, long)]
    pub output: PathBuf,

    /// Split the output: size:700M, duration:300s, timestamps:10s,00:05:00,
    /// frames:250,500 or chapters
    #[arg(long, value_name = "SPEC")]
    pub split: Option<String>,

    /// Link split files through PrevUID/NextUID
    #[arg(long)]
    pub link: bool,

    /// Cue strategy for a track: none, iframes or all (e.g. 2:all)
    #[arg(long, value_name = "TRACK:STRATEGY")]
    pub cues: Vec<String>,

    /// Enable a compatibility hack (repeatable)
    #[arg(long = "hack", value_name = "NAME")]
    pub hacks: Vec<String>,

    /// Maximum cluster duration in milliseconds
    #[arg(long, value_name = "MS")]
    pub cluster_duration: Option<u64>,

    /// Write WebM (restricts codecs and elements)
    #[arg(long)]
    pub webm: bool,

    /// Overwrite output file if it exists
    #[arg(short = 'y', long)]
    pub overwrite: bool,
}

impl CmdRemux {
    /// Execute the remux command.
    pub fn run(&self, mode: OutputMode) -> anyhow::Result<Status> {
        for input in &self.inputs {
            if !input.exists() {
                anyhow::bail!("Input file not found: {}", input.display());
            }
        }

        let mut readers = Vec::with_capacity(self.inputs.len());
        for input in &self.inputs {
            let reader = MatroskaReader::open(input)
                .with_context(|| format!("cannot read {}", input.display()))?;
            readers.push(reader);
        }
        let anomalies: usize = readers.iter().map(|r| r.index().anomalies().len()).sum();
        if anomalies > 0 {
            warn!(anomalies, "Inputs have structural anomalies");
        }

        let total_ns: i64 = readers.iter().map(declared_duration).sum();
        let config = self.config(&readers, total_ns)?;
        let numbered = !config.split_points.is_empty();
        let factory = FileOutputFactory::new(&self.output).numbered(numbered);
        if !self.overwrite && factory.path_for(0).exists() {
            anyhow::bail!(
                "Output file already exists: {} (use -y to overwrite)",
                factory.path_for(0).display()
            );
        }
        let session = MuxSession::new().with_hacks(self.hack_flags()?);

        if mode.is_interactive() {
            println!();
            println!("{}", style("Configuration:").cyan().bold());
            for input in &self.inputs {
                println!("  Input:        {}", style(input.display()).white());
            }
            println!("  Output:       {}", style(self.output.display()).white());
            if let Some(split) = &self.split {
                println!("  Split:        {}", style(split).white());
            }
            if !session.hacks().is_empty() {
                println!("  Hacks:        {}", style(self.hacks.join(", ")).white());
            }
            println!();
        }

        let progress = create_progress_bar(mode, total_ns);
        let start = Instant::now();
        let result = remux_into(&mut readers, config, factory, session, |ts| {
            if let Some(pb) = &progress {
                pb.set_position((ts.max(0) / 1_000_000) as u64);
            }
        });
        if let Some(pb) = &progress {
            pb.finish_and_clear();
        }
        let (stats, _) = result?;
        let elapsed = start.elapsed();

        match mode {
            OutputMode::Json => {
                let output = serde_json::json!({
                    "type": "remux_complete",
                    "stats": stats,
                    "anomalies": anomalies,
                    "elapsed_seconds": elapsed.as_secs_f64(),
                });
                println!("{}", output);
            }
            OutputMode::Quiet => {
                for file in &stats.files {
                    println!("{}", file);
                }
            }
            OutputMode::Normal | OutputMode::Verbose => print_stats(&stats, elapsed),
        }

        Ok(Status::from_anomalies(anomalies))
    }

    /// Assembler configuration for the options, with chapter split points
    /// taken from the first input.
    fn config<F: SegmentIo>(
        &self,
        readers: &[MatroskaReader<F>],
        total_ns: i64,
    ) -> anyhow::Result<AssemblerConfig> {
        let first = readers.first().ok_or_else(|| anyhow!("no input"))?;
        let mut config = if self.webm {
            AssemblerConfig::webm()
        } else {
            AssemblerConfig::default()
        };

        if let Some(spec) = &self.split {
            let points = if spec.trim().eq_ignore_ascii_case("chapters") {
                let chapters = first
                    .chapters()
                    .ok_or_else(|| anyhow!("--split chapters: the first input has no chapters"))?;
                let mut points = SplitPoint::from_chapters(chapters);
                if total_ns > 0 {
                    SplitPoint::trim_chapters_near_end(&mut points, total_ns);
                }
                points
            } else {
                SplitPoint::parse(spec)?
            };
            debug!(points = points.len(), "Split points");
            config = config.with_split_points(points);
        }
        config = config.with_link_files(self.link);

        if let Some(ms) = self.cluster_duration {
            if ms == 0 {
                anyhow::bail!("--cluster-duration must be positive");
            }
            config = config.with_max_cluster_duration(ms as i64 * 1_000_000);
        }

        let tracks = first.track_numbers();
        for (track, strategy) in parse_cue_options(&self.cues)? {
            if !tracks.contains(&track) {
                anyhow::bail!("--cues: the first input has no track {}", track);
            }
            config = config.with_track_options(
                track,
                TrackOptions::default().with_cue_strategy(strategy),
            );
        }

        Ok(config)
    }

    fn hack_flags(&self) -> anyhow::Result<HackFlags> {
        let mut flags = HackFlags::empty();
        for name in &self.hacks {
            let flag = HackFlags::from_hack_name(name).ok_or_else(|| {
                anyhow!(
                    "unknown hack {:?}; known hacks: {}",
                    name,
                    HackFlags::names().collect::<Vec<_>>().join(", ")
                )
            })?;
            flags |= flag;
        }
        Ok(flags)
    }
}

/// Parse `TRACK:STRATEGY` pairs.
pub fn parse_cue_options(values: &[String]) -> anyhow::Result<Vec<(u64, CueStrategy)>> {
    values
        .iter()
        .map(|value| {
            let (track, strategy) = value
                .split_once(':')
                .ok_or_else(|| anyhow!("--cues expects TRACK:STRATEGY, got {:?}", value))?;
            let track = track
                .trim()
                .parse::<u64>()
                .map_err(|_| anyhow!("--cues: invalid track number {:?}", track))?;
            let strategy = strategy.trim().parse::<CueStrategy>()?;
            Ok((track, strategy))
        })
        .collect()
}

/// Duration from the Info of a reader, in nanoseconds; zero when absent.
fn declared_duration<F: SegmentIo>(reader: &MatroskaReader<F>) -> i64 {
    reader
        .info()
        .and_then(|info| info.child_float(DURATION))
        .map_or(0, |ticks| {
            (ticks * reader.timestamp_scale().as_nanos() as f64).round() as i64
        })
}

/// Feed every packet of `readers` to a new assembler writing through
/// `factory`. Each reader after the first is shifted to start where the
/// previous one ended; its tracks must exist in the first one.
///
/// `on_packet` receives the output timestamp of each packet. Returns the
/// statistics and the factory, which owns whatever was written.
pub fn remux_into<F: SegmentIo, O: OutputFactory>(
    readers: &mut [MatroskaReader<F>],
    config: AssemblerConfig,
    factory: O,
    session: MuxSession,
    mut on_packet: impl FnMut(i64),
) -> anyhow::Result<(MuxStats, O)> {
    let (first, rest) = readers
        .split_first_mut()
        .ok_or_else(|| anyhow!("no input"))?;
    let track_numbers = first.track_numbers();
    for (i, reader) in rest.iter().enumerate() {
        if let Some(missing) = reader
            .track_numbers()
            .into_iter()
            .find(|n| !track_numbers.contains(n))
        {
            anyhow::bail!("input {} has track {} that the first input lacks", i + 2, missing);
        }
    }

    let default_durations: HashMap<u64, i64> = first
        .tracks()
        .find_children(TRACK_ENTRY)
        .filter_map(|entry| {
            let number = entry.child_unsigned(TRACK_NUMBER)?;
            let duration = entry.child_unsigned(DEFAULT_DURATION)?;
            Some((number, i64::try_from(duration).ok()?))
        })
        .collect();

    let mut template = SegmentTemplate::new(first.tracks().clone());
    if let Some(info) = first.info() {
        template = template.with_info(info.clone());
    }
    if let Some(chapters) = first.chapters() {
        template = template.with_chapters(chapters.clone());
    }
    if let Some(tags) = first.tags() {
        template = template.with_tags(tags.clone());
    }
    if let Some(attachments) = first.attachments() {
        template = template.with_attachments(attachments.clone());
    }

    let mut assembler = ClusterAssembler::new(factory, config, template, session)?;
    let mut offset = 0i64;
    for (i, reader) in readers.iter_mut().enumerate() {
        let mut end = offset;
        let mut packets = 0usize;
        while let Some(mut packet) = reader.next_packet()? {
            let length = packet
                .duration
                .or_else(|| default_durations.get(&packet.track_number).copied())
                .unwrap_or(0);
            packet.timestamp += offset;
            packet.back_reference = packet.back_reference.map(|r| r + offset);
            packet.forward_reference = packet.forward_reference.map(|r| r + offset);
            end = end.max(packet.timestamp + length);
            on_packet(packet.timestamp);
            assembler.accept_packet(packet)?;
            packets += 1;
        }
        info!(input = i + 1, packets, end_ns = end, "Input consumed");
        offset = end;
    }
    for track in track_numbers {
        assembler.end_of_track(track)?;
    }
    let stats = assembler.finish()?;
    Ok((stats, assembler.into_factory()))
}

/// Progress bar over the output timeline in milliseconds, or a spinner when
/// the duration is unknown.
fn create_progress_bar(mode: OutputMode, total_ns: i64) -> Option<ProgressBar> {
    if !mode.is_interactive() {
        return None;
    }
    let pb = if total_ns > 0 {
        let pb = ProgressBar::new((total_ns / 1_000_000) as u64);
        if let Ok(progress_style) = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {percent}% | ETA: {eta}",
        ) {
            pb.set_style(progress_style.progress_chars("#>-"));
        }
        pb
    } else {
        ProgressBar::new_spinner()
    };
    pb.enable_steady_tick(Duration::from_millis(100));
    Some(pb)
}

fn print_stats(stats: &MuxStats, elapsed: Duration) {
    println!();
    println!("{}", style("Remux Complete:").cyan().bold());
    for file in &stats.files {
        println!("  Output:   {}", style(file).green());
    }
    println!("  Size:     {}", format_size(stats.bytes_written));
    println!(
        "  Duration: {}",
        format_duration(stats.duration_ns as f64 / 1e9)
    );
    println!(
        "  Blocks:   {} in {} clusters, {} cue points",
        stats.block_count, stats.cluster_count, stats.cue_count
    );
    println!("  Time:     {:.1}s", elapsed.as_secs_f64());
    println!();
}
