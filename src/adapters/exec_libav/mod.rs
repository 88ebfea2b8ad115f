//! In-process encoder using libav bindings
//!
//! Every job runs on the blocking pool. libav state is process-wide, so jobs
//! are serialized behind one lock; a second request queues until the first
//! releases it.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use ffmpeg_next::codec::{self, Id};
use ffmpeg_next::format::{self, Pixel, Sample};
use ffmpeg_next::util::frame;
use ffmpeg_next::{filter, media, Dictionary, Packet, Rational};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::domain::errors::*;
use crate::domain::model::*;
use crate::ports::*;

/// Handle given to a blocking job for cancellation and progress
struct JobControl {
    cancel: CancellationToken,
    progress: mpsc::UnboundedSender<f64>,
    duration_secs: Option<f64>,
}

impl JobControl {
    fn check(&self) -> Result<(), DomainError> {
        if self.cancel.is_cancelled() {
            Err(DomainError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn report_position(&self, secs: f64) {
        if let Some(duration) = self.duration_secs.filter(|d| *d > 0.0) {
            let _ = self.progress.send((secs / duration).clamp(0.0, 1.0));
        }
    }
}

fn av_err(context: &'static str) -> impl Fn(ffmpeg_next::Error) -> DomainError {
    move |e| DomainError::ProcessingError(format!("{}: {}", context, e))
}

/// Video re-encode settings for one job
#[derive(Debug, Clone)]
struct TranscodeOptions {
    filter_spec: String,
    /// Output size; the decoder's when unset
    size: Option<(u32, u32)>,
    /// Output frame rate; the source's when unset
    frame_rate: Option<u32>,
    keep_audio: bool,
    preset: Option<String>,
}

/// libav-based encoder
pub struct LibavAdapter {
    lock: Arc<Mutex<()>>,
    preset: Option<String>,
}

impl LibavAdapter {
    pub fn new(preset: Option<String>) -> Self {
        Self {
            lock: Arc::new(Mutex::new(())),
            preset,
        }
    }

    /// Run `work` on the blocking pool, holding the job lock until it
    /// returns and forwarding its progress to the job's sink
    async fn run_blocking<F>(&self, job: &EncodeJob<'_>, work: F) -> Result<(), DomainError>
    where
        F: FnOnce(&JobControl) -> Result<(), DomainError> + Send + 'static,
    {
        let guard = tokio::select! {
            _ = job.cancel.cancelled() => return Err(DomainError::Cancelled),
            guard = Arc::clone(&self.lock).lock_owned() => guard,
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let control = JobControl {
            cancel: job.cancel.clone(),
            progress: tx,
            duration_secs: job.source_duration_secs,
        };

        let handle = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            work(&control)
        });
        tokio::pin!(handle);

        loop {
            tokio::select! {
                Some(fraction) = rx.recv() => job.progress.report(fraction),
                joined = &mut handle => {
                    while let Ok(fraction) = rx.try_recv() {
                        job.progress.report(fraction);
                    }
                    return joined.map_err(|e| {
                        DomainError::InternalError(format!("libav worker failed: {}", e))
                    })?;
                }
            }
        }
    }

    async fn transcode(
        &self,
        job: &EncodeJob<'_>,
        options: TranscodeOptions,
    ) -> Result<(), DomainError> {
        let input = job.input.path.clone();
        let output = job.output.path.clone();
        info!(
            input = %job.input.name,
            output = %job.output.name,
            filter = %options.filter_spec,
            "libav transcode"
        );
        self.run_blocking(job, move |ctl| transcode_video(&input, &output, &options, ctl))
            .await
    }
}

#[async_trait]
impl EncoderPort for LibavAdapter {
    fn backend(&self) -> EncoderBackend {
        EncoderBackend::Libav
    }

    async fn version(&self) -> Result<String, DomainError> {
        let version = ffmpeg_next::util::version();
        Ok(format!(
            "libavutil {}.{}.{}",
            version >> 16,
            (version >> 8) & 0xff,
            version & 0xff
        ))
    }

    async fn probe(&self, path: &Path) -> Result<ProbeReport, DomainError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || probe_file(&path))
            .await
            .map_err(|e| DomainError::ProbeFailed(format!("libav probe worker failed: {}", e)))?
    }

    async fn scale_and_strip_audio(
        &self,
        job: &EncodeJob<'_>,
        filter: &ScaleFilter,
    ) -> Result<(), DomainError> {
        let options = TranscodeOptions {
            filter_spec: format!("{},format=yuv420p", filter.to_filter_spec()),
            size: Some((filter.width, filter.height)),
            frame_rate: None,
            keep_audio: false,
            preset: self.preset.clone(),
        };
        self.transcode(job, options).await
    }

    async fn mux_silent_audio(
        &self,
        job: &EncodeJob<'_>,
        audio: &SilentAudioSpec,
    ) -> Result<(), DomainError> {
        let input = job.input.path.clone();
        let output = job.output.path.clone();
        let audio = audio.clone();
        info!(input = %job.input.name, output = %job.output.name, "libav silent audio mux");
        self.run_blocking(job, move |ctl| mux_silent(&input, &output, &audio, ctl))
            .await
    }

    async fn scale_with_audio_preserved(
        &self,
        job: &EncodeJob<'_>,
        filter: &ScaleFilter,
    ) -> Result<(), DomainError> {
        let options = TranscodeOptions {
            filter_spec: format!("{},format=yuv420p", filter.to_filter_spec()),
            size: Some((filter.width, filter.height)),
            frame_rate: None,
            keep_audio: true,
            preset: self.preset.clone(),
        };
        self.transcode(job, options).await
    }

    async fn normalize_frame_rate(
        &self,
        job: &EncodeJob<'_>,
        rate: FrameRate,
    ) -> Result<(), DomainError> {
        let options = TranscodeOptions {
            filter_spec: format!("fps={},format=yuv420p", rate.fps()),
            size: None,
            frame_rate: Some(rate.fps()),
            keep_audio: true,
            preset: None,
        };
        self.transcode(job, options).await
    }
}

/// Initializes libav once and checks that an H.264 encoder is linked in
#[derive(Debug, Clone, Default)]
pub struct LibavLoader {
    pub preset: Option<String>,
}

#[async_trait]
impl EncoderLoader for LibavLoader {
    async fn load(&self) -> Result<Arc<dyn EncoderPort>, DomainError> {
        tokio::task::spawn_blocking(|| {
            ffmpeg_next::init().map_err(|e| {
                DomainError::EncoderUnavailable(format!("libav initialization failed: {}", e))
            })?;
            find_h264().map_err(|e| DomainError::EncoderUnavailable(e.to_string()))?;
            Ok::<(), DomainError>(())
        })
        .await
        .map_err(|e| DomainError::EncoderUnavailable(format!("libav loader failed: {}", e)))??;

        debug!("libav initialized");
        Ok(Arc::new(LibavAdapter::new(self.preset.clone())))
    }
}

fn find_h264() -> Result<ffmpeg_next::Codec, DomainError> {
    ffmpeg_next::encoder::find_by_name("libx264")
        .or_else(|| ffmpeg_next::encoder::find(Id::H264))
        .ok_or_else(|| DomainError::ProcessingError("No H.264 encoder is available".to_string()))
}

fn stream_time_base(octx: &format::context::Output, index: usize) -> Result<Rational, DomainError> {
    octx.stream(index)
        .map(|s| s.time_base())
        .ok_or_else(|| DomainError::InternalError(format!("Output stream {} missing", index)))
}

fn probe_file(path: &Path) -> Result<ProbeReport, DomainError> {
    let ictx = format::input(path)
        .map_err(|e| DomainError::ProbeFailed(format!("Failed to open {}: {}", path.display(), e)))?;

    let mut report = ProbeReport {
        duration_secs: (ictx.duration() > 0)
            .then(|| ictx.duration() as f64 / f64::from(ffmpeg_next::ffi::AV_TIME_BASE)),
        ..ProbeReport::default()
    };

    if let Some(stream) = ictx.streams().best(media::Type::Video) {
        let params = stream.parameters();
        // Reads plain fields of the stream's codec parameters, which outlive this block
        let (width, height) = unsafe { ((*params.as_ptr()).width, (*params.as_ptr()).height) };
        report.width = u32::try_from(width).ok().filter(|w| *w > 0);
        report.height = u32::try_from(height).ok().filter(|h| *h > 0);
        let rate = stream.avg_frame_rate();
        if rate.denominator() != 0 && rate.numerator() != 0 {
            report.frame_rate = Some(f64::from(rate));
        }
    }

    if let Some(stream) = ictx.streams().best(media::Type::Audio) {
        let params = stream.parameters();
        let (sample_rate, channels) = unsafe {
            (
                (*params.as_ptr()).sample_rate,
                (*params.as_ptr()).ch_layout.nb_channels,
            )
        };
        report.audio = Some(AudioProbe {
            codec: params.id().name().to_string(),
            sample_rate: u32::try_from(sample_rate).ok().filter(|r| *r > 0),
            channels: u16::try_from(channels).ok().filter(|c| *c > 0),
        });
    }

    Ok(report)
}

fn build_video_graph(
    decoder: &ffmpeg_next::decoder::Video,
    time_base: Rational,
    spec: &str,
) -> Result<filter::Graph, DomainError> {
    let mut graph = filter::Graph::new();

    let aspect = decoder.aspect_ratio();
    let aspect = if aspect.numerator() == 0 {
        Rational::new(1, 1)
    } else {
        aspect
    };
    let args = format!(
        "video_size={}x{}:pix_fmt={}:time_base={}/{}:pixel_aspect={}/{}",
        decoder.width(),
        decoder.height(),
        ffmpeg_next::ffi::AVPixelFormat::from(decoder.format()) as i32,
        time_base.numerator(),
        time_base.denominator(),
        aspect.numerator(),
        aspect.denominator()
    );

    let buffer = filter::find("buffer")
        .ok_or_else(|| DomainError::ProcessingError("buffer filter missing".to_string()))?;
    let buffersink = filter::find("buffersink")
        .ok_or_else(|| DomainError::ProcessingError("buffersink filter missing".to_string()))?;

    graph.add(&buffer, "in", &args).map_err(av_err("add buffer source"))?;
    graph.add(&buffersink, "out", "").map_err(av_err("add buffer sink"))?;
    graph
        .output("in", 0)
        .and_then(|p| p.input("out", 0))
        .and_then(|p| p.parse(spec))
        .map_err(av_err("parse filter graph"))?;
    graph.validate().map_err(av_err("validate filter graph"))?;

    Ok(graph)
}

struct VideoPipeline {
    decoder: ffmpeg_next::decoder::Video,
    graph: filter::Graph,
    encoder: ffmpeg_next::encoder::video::Encoder,
    encoder_time_base: Rational,
    output_time_base: Rational,
}

impl VideoPipeline {
    fn send_packet(&mut self, packet: &Packet, octx: &mut format::context::Output) -> Result<(), DomainError> {
        self.decoder.send_packet(packet).map_err(av_err("decode video"))?;
        self.drain_decoder(octx)
    }

    fn finish(&mut self, octx: &mut format::context::Output) -> Result<(), DomainError> {
        self.decoder.send_eof().map_err(av_err("flush decoder"))?;
        self.drain_decoder(octx)?;

        self.graph
            .get("in")
            .ok_or_else(|| DomainError::InternalError("filter source missing".to_string()))?
            .source()
            .flush()
            .map_err(av_err("flush filter graph"))?;
        self.drain_filter(octx)?;

        self.encoder.send_eof().map_err(av_err("flush encoder"))?;
        self.drain_encoder(octx)
    }

    fn drain_decoder(&mut self, octx: &mut format::context::Output) -> Result<(), DomainError> {
        let mut decoded = frame::Video::empty();
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            let timestamp = decoded.timestamp();
            decoded.set_pts(timestamp);
            self.graph
                .get("in")
                .ok_or_else(|| DomainError::InternalError("filter source missing".to_string()))?
                .source()
                .add(&decoded)
                .map_err(av_err("feed filter graph"))?;
            self.drain_filter(octx)?;
        }
        Ok(())
    }

    fn drain_filter(&mut self, octx: &mut format::context::Output) -> Result<(), DomainError> {
        let mut filtered = frame::Video::empty();
        loop {
            let pulled = self
                .graph
                .get("out")
                .ok_or_else(|| DomainError::InternalError("filter sink missing".to_string()))?
                .sink()
                .frame(&mut filtered);
            if pulled.is_err() {
                return Ok(());
            }
            filtered.set_kind(ffmpeg_next::picture::Type::None);
            self.encoder.send_frame(&filtered).map_err(av_err("encode video"))?;
            self.drain_encoder(octx)?;
        }
    }

    fn drain_encoder(&mut self, octx: &mut format::context::Output) -> Result<(), DomainError> {
        let mut encoded = Packet::empty();
        while self.encoder.receive_packet(&mut encoded).is_ok() {
            encoded.set_stream(0);
            encoded.rescale_ts(self.encoder_time_base, self.output_time_base);
            encoded
                .write_interleaved(octx)
                .map_err(av_err("write video packet"))?;
        }
        Ok(())
    }
}

fn transcode_video(
    input: &Path,
    output: &Path,
    options: &TranscodeOptions,
    ctl: &JobControl,
) -> Result<(), DomainError> {
    let mut ictx = format::input(&input).map_err(av_err("open input"))?;

    let (video_index, input_time_base, source_rate, decoder) = {
        let stream = ictx
            .streams()
            .best(media::Type::Video)
            .ok_or_else(|| DomainError::ProcessingError("Input has no video stream".to_string()))?;
        let decoder = codec::context::Context::from_parameters(stream.parameters())
            .and_then(|ctx| ctx.decoder().video())
            .map_err(av_err("open video decoder"))?;
        (stream.index(), stream.time_base(), stream.avg_frame_rate(), decoder)
    };

    let audio = if options.keep_audio {
        ictx.streams()
            .best(media::Type::Audio)
            .map(|s| (s.index(), s.time_base(), s.parameters()))
    } else {
        None
    };

    let graph = build_video_graph(&decoder, input_time_base, &options.filter_spec)?;
    let (width, height) = options
        .size
        .unwrap_or_else(|| (decoder.width(), decoder.height()));
    let encoder_time_base = match options.frame_rate {
        Some(fps) => Rational::new(1, fps as i32),
        None => input_time_base,
    };

    let mut octx = format::output(&output).map_err(av_err("open output"))?;
    let global_header = octx.format().flags().contains(format::Flags::GLOBAL_HEADER);

    let h264 = find_h264()?;
    let encoder = {
        let mut ost = octx.add_stream(h264).map_err(av_err("add video stream"))?;
        let mut enc = codec::context::Context::new_with_codec(h264)
            .encoder()
            .video()
            .map_err(av_err("create video encoder"))?;
        enc.set_width(width);
        enc.set_height(height);
        enc.set_aspect_ratio(Rational::new(1, 1));
        enc.set_format(Pixel::YUV420P);
        enc.set_time_base(encoder_time_base);
        match options.frame_rate {
            Some(fps) => enc.set_frame_rate(Some(Rational::new(fps as i32, 1))),
            None => enc.set_frame_rate(Some(source_rate)),
        }
        if global_header {
            enc.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let mut opts = Dictionary::new();
        if let Some(preset) = &options.preset {
            opts.set("preset", preset);
        }
        let opened = enc
            .open_as_with(h264, opts)
            .map_err(av_err("open video encoder"))?;
        ost.set_parameters(&opened);
        opened
    };

    let audio_map = match audio {
        Some((index, time_base, parameters)) => {
            let mut ost = octx
                .add_stream(ffmpeg_next::encoder::find(Id::None))
                .map_err(av_err("add audio stream"))?;
            ost.set_parameters(parameters);
            Some((index, time_base, ost.index()))
        }
        None => None,
    };

    octx.write_header().map_err(av_err("write header"))?;

    let mut pipeline = VideoPipeline {
        decoder,
        graph,
        encoder,
        encoder_time_base,
        output_time_base: stream_time_base(&octx, 0)?,
    };
    let audio_out = match audio_map {
        Some((index, time_base, out_index)) => Some((
            index,
            time_base,
            out_index,
            stream_time_base(&octx, out_index)?,
        )),
        None => None,
    };

    for (stream, mut packet) in ictx.packets() {
        ctl.check()?;

        if stream.index() == video_index {
            if let Some(pts) = packet.pts() {
                ctl.report_position(pts as f64 * f64::from(input_time_base));
            }
            pipeline.send_packet(&packet, &mut octx)?;
        } else if let Some((index, in_tb, out_index, out_tb)) = audio_out {
            if stream.index() == index {
                packet.rescale_ts(in_tb, out_tb);
                packet.set_position(-1);
                packet.set_stream(out_index);
                packet
                    .write_interleaved(&mut octx)
                    .map_err(av_err("write audio packet"))?;
            }
        }
    }

    ctl.check()?;
    pipeline.finish(&mut octx)?;
    octx.write_trailer().map_err(av_err("write trailer"))?;
    Ok(())
}

/// Generates silent AAC frames and writes them interleaved with video packets
struct SilenceTrack {
    graph: filter::Graph,
    encoder: ffmpeg_next::encoder::audio::Encoder,
    sample_rate: i32,
    frame_size: u32,
    next_pts: i64,
    stream_index: usize,
    output_time_base: Rational,
}

impl SilenceTrack {
    fn samples_at(&self, secs: f64) -> i64 {
        (secs * f64::from(self.sample_rate)).floor() as i64
    }

    /// Encode whole frames of silence that end at or before `secs`
    fn fill_until(&mut self, secs: f64, octx: &mut format::context::Output) -> Result<(), DomainError> {
        let target = self.samples_at(secs);
        while let Some(len) = silence_frame_len(self.next_pts, self.frame_size, target, false) {
            self.encode_frame(len, octx)?;
        }
        Ok(())
    }

    /// Pad the track to exactly `secs`, shortening the last frame, then flush
    fn finish_at(&mut self, secs: f64, octx: &mut format::context::Output) -> Result<(), DomainError> {
        let target = self.samples_at(secs);
        while let Some(len) = silence_frame_len(self.next_pts, self.frame_size, target, true) {
            self.encode_frame(len, octx)?;
        }
        self.encoder.send_eof().map_err(av_err("flush audio encoder"))?;
        self.drain(octx)
    }

    fn encode_frame(&mut self, len: usize, octx: &mut format::context::Output) -> Result<(), DomainError> {
        let mut samples = frame::Audio::empty();
        self.graph
            .get("out")
            .ok_or_else(|| DomainError::InternalError("silence sink missing".to_string()))?
            .sink()
            .frame(&mut samples)
            .map_err(av_err("generate silence"))?;
        if len < samples.samples() {
            samples.set_samples(len);
        }
        samples.set_pts(Some(self.next_pts));
        self.next_pts += samples.samples() as i64;

        self.encoder.send_frame(&samples).map_err(av_err("encode audio"))?;
        self.drain(octx)
    }

    fn drain(&mut self, octx: &mut format::context::Output) -> Result<(), DomainError> {
        let encoder_time_base = Rational::new(1, self.sample_rate);
        let mut encoded = Packet::empty();
        while self.encoder.receive_packet(&mut encoded).is_ok() {
            encoded.set_stream(self.stream_index);
            encoded.rescale_ts(encoder_time_base, self.output_time_base);
            encoded
                .write_interleaved(octx)
                .map_err(av_err("write audio packet"))?;
        }
        Ok(())
    }
}

/// Length of the next silent frame when `written` samples are already
/// encoded and the track must not run past `target` samples. Only whole
/// frames are produced unless `pad_to_target` allows a short final one.
fn silence_frame_len(written: i64, frame_size: u32, target: i64, pad_to_target: bool) -> Option<usize> {
    let remaining = target - written;
    let frame_size = i64::from(frame_size);
    if remaining >= frame_size {
        Some(frame_size as usize)
    } else if pad_to_target && remaining > 0 {
        Some(remaining as usize)
    } else {
        None
    }
}

fn mux_silent(
    input: &Path,
    output: &Path,
    audio: &SilentAudioSpec,
    ctl: &JobControl,
) -> Result<(), DomainError> {
    let mut ictx = format::input(&input).map_err(av_err("open input"))?;
    let (video_index, input_time_base, video_parameters) = {
        let stream = ictx
            .streams()
            .best(media::Type::Video)
            .ok_or_else(|| DomainError::ProcessingError("Input has no video stream".to_string()))?;
        (stream.index(), stream.time_base(), stream.parameters())
    };

    let mut octx = format::output(&output).map_err(av_err("open output"))?;
    let global_header = octx.format().flags().contains(format::Flags::GLOBAL_HEADER);

    {
        let mut ost = octx
            .add_stream(ffmpeg_next::encoder::find(Id::None))
            .map_err(av_err("add video stream"))?;
        ost.set_parameters(video_parameters);
    }

    let sample_rate = audio.sample_rate as i32;
    let aac = ffmpeg_next::encoder::find(Id::AAC)
        .ok_or_else(|| DomainError::ProcessingError("No AAC encoder is available".to_string()))?;
    let encoder = {
        let mut ost = octx.add_stream(aac).map_err(av_err("add audio stream"))?;
        ost.set_time_base(Rational::new(1, sample_rate));
        let mut enc = codec::context::Context::new_with_codec(aac)
            .encoder()
            .audio()
            .map_err(av_err("create audio encoder"))?;
        enc.set_rate(sample_rate);
        enc.set_format(Sample::F32(format::sample::Type::Planar));
        enc.set_bit_rate(audio.bitrate_kbps as usize * 1000);
        enc.set_time_base(Rational::new(1, sample_rate));
        if global_header {
            enc.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let mut opts = Dictionary::new();
        opts.set("ch_layout", audio.channel_layout);
        let opened = enc
            .open_as_with(aac, opts)
            .map_err(av_err("open audio encoder"))?;
        ost.set_parameters(&opened);
        opened
    };
    let frame_size = match encoder.frame_size() {
        0 => 1024,
        n => n,
    };

    let mut graph = filter::Graph::new();
    let sink = filter::find("abuffersink")
        .ok_or_else(|| DomainError::ProcessingError("abuffersink filter missing".to_string()))?;
    graph.add(&sink, "out", "").map_err(av_err("add audio sink"))?;
    graph
        .input("out", 0)
        .and_then(|p| p.parse(&format!("{},aformat=sample_fmts=fltp", audio.lavfi_source())))
        .map_err(av_err("parse silence graph"))?;
    graph.validate().map_err(av_err("validate silence graph"))?;
    graph
        .get("out")
        .ok_or_else(|| DomainError::InternalError("silence sink missing".to_string()))?
        .sink()
        .set_frame_size(frame_size);

    octx.write_header().map_err(av_err("write header"))?;
    let video_out_tb = stream_time_base(&octx, 0)?;

    let mut silence = SilenceTrack {
        graph,
        encoder,
        sample_rate,
        frame_size,
        next_pts: 0,
        stream_index: 1,
        output_time_base: stream_time_base(&octx, 1)?,
    };

    let mut video_end_secs = 0.0_f64;
    for (stream, mut packet) in ictx.packets() {
        ctl.check()?;
        if stream.index() != video_index {
            continue;
        }

        if let Some(pts) = packet.pts() {
            let start = pts as f64 * f64::from(input_time_base);
            let end = (pts + packet.duration()) as f64 * f64::from(input_time_base);
            video_end_secs = video_end_secs.max(end);
            silence.fill_until(start, &mut octx)?;
            ctl.report_position(start);
        }

        packet.rescale_ts(input_time_base, video_out_tb);
        packet.set_position(-1);
        packet.set_stream(0);
        packet
            .write_interleaved(&mut octx)
            .map_err(av_err("write video packet"))?;
    }

    ctl.check()?;
    silence.finish_at(video_end_secs, &mut octx)?;
    octx.write_trailer().map_err(av_err("write trailer"))?;
    Ok(())
}
