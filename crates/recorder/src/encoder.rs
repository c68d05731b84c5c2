//! Session encoders
//!
//! A recording session pushes already-compressed JPEG frames into a
//! [`FrameEncoder`]. The production encoder is a GStreamer pipeline
//! `appsrc (image/jpeg) ! avimux ! filesink`; the container is only written
//! out completely once end-of-stream has reached the muxer.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use tracing::{debug, warn};

use crate::RecorderError;

/// How long `finish` waits for end-of-stream to drain through the muxer
const EOS_TIMEOUT_SECS: u64 = 5;

/// Sink for the JPEG frames of one recording session
pub trait FrameEncoder: Send {
    /// Frame size fixed when the session was opened
    fn dimensions(&self) -> (u32, u32);

    /// Frames accepted so far
    fn frame_count(&self) -> u64;

    /// Append one JPEG frame. On error the frame is not counted.
    fn write_frame(&mut self, jpeg: &[u8]) -> Result<(), RecorderError>;

    /// Flush and close the container, returning the final frame count
    fn finish(self: Box<Self>) -> Result<u64, RecorderError>;
}

/// Motion-JPEG AVI writer backed by a GStreamer pipeline
pub struct GstAviWriter {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    width: u32,
    height: u32,
    frame_nanos: u64,
    frames: u64,
}

impl GstAviWriter {
    /// Build and start the pipeline writing to `path`
    pub fn new(path: &Path, width: u32, height: u32, fps: u32) -> Result<Self, RecorderError> {
        gst::init()?;
        let fps = fps.max(1);

        let pipeline = gst::Pipeline::new();
        let caps = gst::Caps::builder("image/jpeg")
            .field("width", width as i32)
            .field("height", height as i32)
            .field("framerate", gst::Fraction::new(fps as i32, 1))
            .build();

        let appsrc = gst_app::AppSrc::builder()
            .name("src")
            .caps(&caps)
            .format(gst::Format::Time)
            .is_live(true)
            .build();

        let muxer = gst::ElementFactory::make("avimux")
            .build()
            .map_err(|e| RecorderError::EncoderOpen(format!("Failed to create avimux: {}", e)))?;

        let filesink = gst::ElementFactory::make("filesink")
            .property("location", path.to_string_lossy().to_string())
            .property("async", false)
            .build()
            .map_err(|e| RecorderError::EncoderOpen(format!("Failed to create filesink: {}", e)))?;

        pipeline
            .add_many([appsrc.upcast_ref(), &muxer, &filesink])
            .map_err(|e| RecorderError::EncoderOpen(format!("Failed to add elements: {}", e)))?;
        gst::Element::link_many([appsrc.upcast_ref(), &muxer, &filesink])
            .map_err(|e| RecorderError::EncoderOpen(format!("Failed to link elements: {}", e)))?;

        // Live appsrc needs no preroll; the pipeline settles on the first buffer
        pipeline.set_state(gst::State::Playing)?;
        debug!("AVI pipeline started for {}", path.display());

        Ok(Self {
            pipeline,
            appsrc,
            width,
            height,
            frame_nanos: 1_000_000_000 / u64::from(fps),
            frames: 0,
        })
    }
}

impl FrameEncoder for GstAviWriter {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn frame_count(&self) -> u64 {
        self.frames
    }

    fn write_frame(&mut self, jpeg: &[u8]) -> Result<(), RecorderError> {
        let mut buffer = gst::Buffer::from_slice(jpeg.to_vec());
        if let Some(buffer_ref) = buffer.get_mut() {
            buffer_ref.set_pts(gst::ClockTime::from_nseconds(self.frames * self.frame_nanos));
            buffer_ref.set_duration(gst::ClockTime::from_nseconds(self.frame_nanos));
        }

        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| RecorderError::Pipeline(format!("Failed to push buffer: {:?}", e)))?;
        self.frames += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<u64, RecorderError> {
        if let Err(e) = self.appsrc.end_of_stream() {
            warn!("Failed to send EOS: {:?}", e);
        }
        let outcome = wait_for_eos(&self.pipeline);
        // Null before drop or GStreamer complains about leaked state
        let _ = self.pipeline.set_state(gst::State::Null);
        outcome.map(|()| self.frames)
    }
}

impl Drop for GstAviWriter {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

fn wait_for_eos(pipeline: &gst::Pipeline) -> Result<(), RecorderError> {
    let Some(bus) = pipeline.bus() else {
        return Err(RecorderError::Pipeline("Pipeline has no bus".to_string()));
    };
    for msg in bus.iter_timed(gst::ClockTime::from_seconds(EOS_TIMEOUT_SECS)) {
        match msg.view() {
            gst::MessageView::Eos(..) => return Ok(()),
            gst::MessageView::Error(err) => {
                return Err(RecorderError::Pipeline(format!(
                    "Pipeline error: {} ({:?})",
                    err.error(),
                    err.debug()
                )));
            }
            _ => {}
        }
    }
    Err(RecorderError::Pipeline("Timed out waiting for EOS".to_string()))
}

/// Count the video frames in an AVI file by demuxing it to the end
pub fn count_frames(path: &Path) -> Result<u64, RecorderError> {
    gst::init()?;

    let pipeline = gst::Pipeline::new();
    let filesrc = gst::ElementFactory::make("filesrc")
        .property("location", path.to_string_lossy().to_string())
        .build()
        .map_err(|e| RecorderError::Pipeline(format!("Failed to create filesrc: {}", e)))?;
    let demuxer = gst::ElementFactory::make("avidemux")
        .build()
        .map_err(|e| RecorderError::Pipeline(format!("Failed to create avidemux: {}", e)))?;
    let appsink = gst_app::AppSink::builder().name("sink").sync(false).build();

    pipeline
        .add_many([&filesrc, &demuxer, appsink.upcast_ref()])
        .map_err(|e| RecorderError::Pipeline(format!("Failed to add elements: {}", e)))?;
    filesrc
        .link(&demuxer)
        .map_err(|e| RecorderError::Pipeline(format!("Failed to link elements: {}", e)))?;

    // avidemux exposes its stream pads only once the header is parsed
    let sink_element = appsink.clone().upcast::<gst::Element>();
    demuxer.connect_pad_added(move |_, src_pad| {
        if let Some(sink_pad) = sink_element.static_pad("sink") {
            if !sink_pad.is_linked() {
                if let Err(e) = src_pad.link(&sink_pad) {
                    warn!("Failed to link demuxed pad: {:?}", e);
                }
            }
        }
    });

    let frames = Arc::new(AtomicU64::new(0));
    let counter = frames.clone();
    appsink.set_callbacks(
        gst_app::AppSinkCallbacks::builder()
            .new_sample(move |sink| match sink.pull_sample() {
                Ok(_) => {
                    counter.fetch_add(1, Ordering::Relaxed);
                    Ok(gst::FlowSuccess::Ok)
                }
                Err(_) => Err(gst::FlowError::Error),
            })
            .build(),
    );

    pipeline.set_state(gst::State::Playing)?;
    let outcome = wait_for_eos(&pipeline);
    let _ = pipeline.set_state(gst::State::Null);
    outcome.map(|()| frames.load(Ordering::Relaxed))
}
