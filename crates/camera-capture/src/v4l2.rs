//! V4L2 frame source backed by memory-mapped driver buffers

use std::io::ErrorKind;
use std::time::Duration;

use chrono::Local;
use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::frame::{decode_mjpeg, yuyv_to_rgb, PixelFormat, VideoFrame};
use crate::{CameraConfig, CameraError, FrameSource};

/// Open device plus its streaming buffers. Dropping it releases both.
struct OpenDevice {
    // Declared first so the stream is torn down before the device handle.
    stream: MmapStream<'static>,
    _device: Device,
    width: u32,
    height: u32,
}

/// Camera driver wrapper
pub struct V4l2Source {
    config: CameraConfig,
    open: Option<OpenDevice>,
    sequence: u64,
}

impl V4l2Source {
    /// Open the configured device and start streaming
    pub fn open(config: CameraConfig) -> Result<Self, CameraError> {
        let open = open_device(&config)?;
        Ok(Self {
            config,
            open: Some(open),
            sequence: 0,
        })
    }

    fn decode(&self, raw: &[u8], width: u32, height: u32) -> Result<VideoFrame, CameraError> {
        let captured_at = Local::now();
        let frame = match self.config.format {
            PixelFormat::Mjpeg => decode_mjpeg(raw, captured_at, self.sequence)?,
            PixelFormat::Yuyv => {
                let rgb = yuyv_to_rgb(raw, width, height)?;
                VideoFrame::from_rgb(rgb, width, height, captured_at, self.sequence)?
            }
            PixelFormat::Rgb24 => {
                let len = width as usize * height as usize * 3;
                if raw.len() < len {
                    let msg = format!("short RGB buffer: {} bytes", raw.len());
                    return Err(CameraError::Decode(msg));
                }
                let rgb = raw[..len].to_vec();
                VideoFrame::from_rgb(rgb, width, height, captured_at, self.sequence)?
            }
        };

        if frame.dimensions() != (width, height) {
            return Err(CameraError::Format(format!(
                "frame is {}x{}, device negotiated {}x{}",
                frame.width, frame.height, width, height
            )));
        }
        Ok(frame)
    }
}

impl FrameSource for V4l2Source {
    fn read(&mut self) -> Result<VideoFrame, CameraError> {
        let open = self.open.as_mut().ok_or(CameraError::NotInitialized)?;
        let (width, height) = (open.width, open.height);

        let raw = {
            let (buf, meta) = open.stream.next().map_err(|e| match e.kind() {
                ErrorKind::TimedOut => CameraError::Stream(format!(
                    "no frame within {} ms",
                    self.config.read_timeout_ms
                )),
                _ => CameraError::Stream(e.to_string()),
            })?;
            let used = match meta.bytesused as usize {
                0 => buf.len(),
                n => n.min(buf.len()),
            };
            buf[..used].to_vec()
        };

        self.sequence += 1;
        self.decode(&raw, width, height)
    }

    fn reopen(&mut self) -> Result<(), CameraError> {
        info!("Reopening camera {}", self.config.device);
        // Release the old handle before asking the driver for a new one
        self.open = None;
        self.open = Some(open_device(&self.config)?);
        Ok(())
    }

    fn dimensions(&self) -> (u32, u32) {
        self.open
            .as_ref()
            .map(|o| (o.width, o.height))
            .unwrap_or((self.config.width, self.config.height))
    }
}

/// Per-read wait, at least one millisecond
fn read_timeout(config: &CameraConfig) -> Duration {
    Duration::from_millis(config.read_timeout_ms.max(1))
}

fn open_device(config: &CameraConfig) -> Result<OpenDevice, CameraError> {
    info!("Initializing V4L2 capture: {}", config.device);

    let device = Device::with_path(&config.device)
        .map_err(|e| CameraError::Open(format!("{}: {}", config.device, e)))?;

    let caps = device
        .query_caps()
        .map_err(|e| CameraError::Open(e.to_string()))?;
    debug!("Device: {} ({})", caps.card, caps.driver);

    if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
        return Err(CameraError::Open(format!(
            "{} does not support video capture",
            config.device
        )));
    }

    let mut fmt = device
        .format()
        .map_err(|e| CameraError::Format(e.to_string()))?;
    fmt.width = config.width;
    fmt.height = config.height;
    fmt.fourcc = FourCC::new(&config.format.fourcc());

    let actual = device
        .set_format(&fmt)
        .map_err(|e| CameraError::Format(e.to_string()))?;

    if actual.fourcc != fmt.fourcc {
        return Err(CameraError::Format(format!(
            "device refused {:?}, offered {}",
            config.format, actual.fourcc
        )));
    }
    if actual.width != config.width || actual.height != config.height {
        warn!(
            "Requested {}x{}, device negotiated {}x{}",
            config.width, config.height, actual.width, actual.height
        );
    }

    let mut stream = MmapStream::with_buffers(&device, Type::VideoCapture, config.buffer_count)
        .map_err(|e| CameraError::Stream(e.to_string()))?;
    // Dequeue gives up after read_timeout_ms and the read reports a stream error
    stream.set_timeout(read_timeout(config));

    info!(
        "Capture stream started: {}x{} {:?} with {} buffers",
        actual.width, actual.height, config.format, config.buffer_count
    );

    Ok(OpenDevice {
        stream,
        _device: device,
        width: actual.width,
        height: actual.height,
    })
}
