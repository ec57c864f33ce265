/*! Audio sample streams.

The modem wants little endian 16 bit PCM at 9600 samples/s, mono.
This module abstracts where those samples come from and go: raw
PCM files or pipes for testing and offline work, or a real sound
device through cpal when built with the `audio` feature.
 */
use std::io::{Read, Write};

use crate::{Error, Result};

/// Where received samples come from.
pub trait AudioSource: Send {
    /// Read samples. Returns how many were read; 0 means end of
    /// stream. May block.
    fn read(&mut self, buf: &mut [i16]) -> Result<usize>;
}

/// Where transmitted samples go.
pub trait AudioSink: Send {
    /// Write samples. May block.
    fn write(&mut self, buf: &[i16]) -> Result<()>;
    /// Push everything out to the device.
    fn flush(&mut self) -> Result<()>;
}

/// Raw little endian PCM from any reader.
pub struct RawSource<R: Read + Send> {
    inner: R,
}

impl<R: Read + Send> RawSource<R> {
    /// Wrap a reader.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R: Read + Send> AudioSource for RawSource<R> {
    fn read(&mut self, buf: &mut [i16]) -> Result<usize> {
        let mut bytes = vec![0u8; buf.len() * 2];
        let mut got = 0;
        // Land on a whole number of samples.
        while got == 0 || got % 2 != 0 {
            let n = self
                .inner
                .read(&mut bytes[got..])
                .map_err(|e| Error::Io(e, "audio read".into()))?;
            if n == 0 {
                if got % 2 != 0 {
                    return Err(Error::Audio("audio stream ended mid-sample".into()));
                }
                break;
            }
            got += n;
        }
        for (i, pair) in bytes[..got].chunks_exact(2).enumerate() {
            buf[i] = i16::from_le_bytes([pair[0], pair[1]]);
        }
        Ok(got / 2)
    }
}

/// Raw little endian PCM to any writer.
pub struct RawSink<W: Write + Send> {
    inner: W,
}

impl<W: Write + Send> RawSink<W> {
    /// Wrap a writer.
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

impl<W: Write + Send> AudioSink for RawSink<W> {
    fn write(&mut self, buf: &[i16]) -> Result<()> {
        let mut bytes = Vec::with_capacity(buf.len() * 2);
        for &s in buf {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        self.inner
            .write_all(&bytes)
            .map_err(|e| Error::Io(e, "audio write".into()))
    }

    fn flush(&mut self) -> Result<()> {
        self.inner
            .flush()
            .map_err(|e| Error::Io(e, "audio flush".into()))
    }
}

/// Open the configured audio device.
///
/// `raw:<input>:<output>` opens raw PCM files or FIFOs. Anything
/// else needs the `audio` feature, which hands the name to cpal
/// (`default` picks the default device).
pub fn open(name: &str) -> Result<(Box<dyn AudioSource>, Box<dyn AudioSink>)> {
    if let Some(paths) = name.strip_prefix("raw:") {
        let (inp, outp) = paths.split_once(':').ok_or_else(|| {
            Error::Config(format!("audio device {name:?} should be raw:<in>:<out>"))
        })?;
        let src = std::fs::File::open(inp)
            .map_err(|e| Error::Io(e, format!("opening audio input {inp}")))?;
        let dst = std::fs::File::create(outp)
            .map_err(|e| Error::Io(e, format!("opening audio output {outp}")))?;
        return Ok((
            Box::new(RawSource::new(std::io::BufReader::new(src))),
            Box::new(RawSink::new(std::io::BufWriter::new(dst))),
        ));
    }
    #[cfg(feature = "audio")]
    {
        cpal_device::open(name)
    }
    #[cfg(not(feature = "audio"))]
    {
        Err(Error::Audio(format!(
            "built without the audio feature; use ADEVICE raw:<in>:<out>, not {name:?}"
        )))
    }
}

#[cfg(feature = "audio")]
mod cpal_device {
    //! Sound card backend. The cpal streams are not Send, so each
    //! one lives on a thread of its own and talks over a channel.
    use std::sync::mpsc::{Receiver, SyncSender, sync_channel};

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use log::{error, info};

    use super::{AudioSink, AudioSource};
    use crate::{Error, Result, SAMPLE_RATE};

    fn find_device(name: &str, output: bool) -> Result<cpal::Device> {
        let host = cpal::default_host();
        let dev = if name == "default" {
            if output {
                host.default_output_device()
            } else {
                host.default_input_device()
            }
        } else {
            let mut found = None;
            let devices = host
                .devices()
                .map_err(|e| Error::Audio(format!("enumerating devices: {e}")))?;
            for d in devices {
                if d.name().map(|n| n == name).unwrap_or(false) {
                    found = Some(d);
                    break;
                }
            }
            found
        };
        dev.ok_or_else(|| Error::Audio(format!("no audio device {name:?}")))
    }

    struct CpalSource {
        rx: Receiver<i16>,
    }

    impl AudioSource for CpalSource {
        fn read(&mut self, buf: &mut [i16]) -> Result<usize> {
            for (i, slot) in buf.iter_mut().enumerate() {
                match if i == 0 {
                    self.rx.recv().map_err(|_| ())
                } else {
                    self.rx.try_recv().map_err(|_| ())
                } {
                    Ok(s) => *slot = s,
                    Err(_) if i == 0 => return Ok(0),
                    Err(_) => return Ok(i),
                }
            }
            Ok(buf.len())
        }
    }

    struct CpalSink {
        tx: SyncSender<i16>,
    }

    impl AudioSink for CpalSink {
        fn write(&mut self, buf: &[i16]) -> Result<()> {
            for &s in buf {
                self.tx
                    .send(s)
                    .map_err(|_| Error::Audio("output stream gone".into()))?;
            }
            Ok(())
        }
        fn flush(&mut self) -> Result<()> {
            Ok(())
        }
    }

    pub fn open(name: &str) -> Result<(Box<dyn AudioSource>, Box<dyn AudioSink>)> {
        let config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(SAMPLE_RATE as u32),
            buffer_size: cpal::BufferSize::Default,
        };

        let (in_tx, in_rx) = sync_channel::<i16>(SAMPLE_RATE as usize);
        let (out_tx, out_rx) = sync_channel::<i16>(SAMPLE_RATE as usize * 3);

        let in_dev = find_device(name, false)?;
        let out_dev = find_device(name, true)?;
        info!(
            "audio devices: in {:?}, out {:?}",
            in_dev.name().unwrap_or_default(),
            out_dev.name().unwrap_or_default()
        );

        let in_config = config.clone();
        std::thread::spawn(move || {
            let err_fn = |err| error!("audio input stream error: {err}");
            let stream = in_dev.build_input_stream(
                &in_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    for &s in data {
                        // Drop samples if the demodulator falls
                        // behind rather than blocking the callback.
                        let _ = in_tx.try_send(s);
                    }
                },
                err_fn,
                None,
            );
            match stream {
                Ok(stream) => {
                    if let Err(e) = stream.play() {
                        error!("audio input start: {e}");
                        return;
                    }
                    // Keep the stream alive.
                    loop {
                        std::thread::sleep(std::time::Duration::from_secs(3600));
                    }
                }
                Err(e) => error!("audio input open: {e}"),
            }
        });

        let out_config = config;
        std::thread::spawn(move || {
            let err_fn = |err| error!("audio output stream error: {err}");
            let stream = out_dev.build_output_stream(
                &out_config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    for slot in data.iter_mut() {
                        *slot = out_rx.try_recv().unwrap_or(0);
                    }
                },
                err_fn,
                None,
            );
            match stream {
                Ok(stream) => {
                    if let Err(e) = stream.play() {
                        error!("audio output start: {e}");
                        return;
                    }
                    loop {
                        std::thread::sleep(std::time::Duration::from_secs(3600));
                    }
                }
                Err(e) => error!("audio output open: {e}"),
            }
        });

        Ok((
            Box::new(CpalSource { rx: in_rx }),
            Box::new(CpalSink { tx: out_tx }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_round_trip() {
        let samples: Vec<i16> = vec![0, 1, -1, 32767, -32768, 12345];
        let mut wire = Vec::new();
        RawSink::new(&mut wire).write(&samples).unwrap();
        assert_eq!(wire.len(), samples.len() * 2);

        let mut src = RawSource::new(&wire[..]);
        let mut got = vec![0i16; samples.len()];
        assert_eq!(src.read(&mut got).unwrap(), samples.len());
        assert_eq!(got, samples);
        // Stream exhausted.
        assert_eq!(src.read(&mut got).unwrap(), 0);
    }

    #[test]
    fn short_reads_are_whole_samples() {
        let bytes = [0x34u8, 0x12, 0x78, 0x56];
        let mut src = RawSource::new(&bytes[..]);
        let mut buf = vec![0i16; 10];
        let n = src.read(&mut buf).unwrap();
        assert_eq!(n, 2);
        assert_eq!(buf[0], 0x1234);
        assert_eq!(buf[1], 0x5678);
    }

    #[test]
    fn truncated_stream_is_an_error() {
        let bytes = [0x34u8, 0x12, 0x78];
        let mut src = RawSource::new(&bytes[..]);
        let mut buf = vec![0i16; 10];
        assert!(src.read(&mut buf).is_err());
    }

    #[test]
    fn unknown_device_without_feature() {
        if cfg!(not(feature = "audio")) {
            assert!(open("default").is_err());
        }
        assert!(open("raw:only-one-part").is_err());
    }
}
