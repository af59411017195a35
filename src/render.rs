//! Per-pixel shader evaluation.
//!
//! One program is assembled (and optimized) once, then shared read-only by
//! a pool of scoped worker threads. Every pixel runs on a fresh `Vm` with
//! the shader uniforms bound, and its `retval` is read as an RGB colour.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::num::NonZeroUsize;
use std::path::Path;
use std::thread;

use tracing::debug;

use crate::config::{RenderConfig, RuntimeConfig};
use crate::error::{Error, Result, RuntimeError};
use crate::vm::{Operand, Program, Vm};

/// Colour written for pixels whose shader run fails.
pub const ERROR_COLOR: [u8; 3] = [0, 0, 0];

#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    pub width: u32,
    pub height: u32,
    /// Value bound to `iTime`
    pub time: f64,
    /// Worker threads (0 = one per available core)
    pub threads: usize,
    /// Per-pixel execution ceiling
    pub max_instructions: usize,
}

impl RenderOptions {
    pub fn new(render: &RenderConfig, runtime: &RuntimeConfig) -> Self {
        Self {
            width: render.width,
            height: render.height,
            time: render.time,
            threads: render.threads,
            max_instructions: runtime.max_instructions,
        }
    }

    fn worker_count(&self) -> usize {
        let wanted = match self.threads {
            0 => thread::available_parallelism().map_or(1, NonZeroUsize::get),
            n => n,
        };
        wanted.clamp(1, self.height.max(1) as usize)
    }

    fn runtime(&self) -> RuntimeConfig {
        RuntimeConfig {
            max_instructions: self.max_instructions,
            ..Default::default()
        }
    }
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self::new(&RenderConfig::default(), &RuntimeConfig::default())
    }
}

/// An RGB8 image, rows top to bottom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    /// Pixels that got `ERROR_COLOR`
    pub failed: usize,
}

impl Image {
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let at = (y as usize * self.width as usize + x as usize) * 3;
        Some([self.pixels[at], self.pixels[at + 1], self.pixels[at + 2]])
    }

    /// Binary PPM (P6).
    pub fn write_ppm_to(&self, out: &mut impl Write) -> io::Result<()> {
        write!(out, "P6\n{} {}\n255\n", self.width, self.height)?;
        out.write_all(&self.pixels)?;
        out.flush()
    }

    pub fn write_ppm(&self, path: &Path) -> Result<()> {
        let io_error = |source| Error::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut out = BufWriter::new(File::create(path).map_err(io_error)?);
        self.write_ppm_to(&mut out).map_err(io_error)
    }
}

/// Evaluate `program` once per pixel.
///
/// The top-left pixel is run first; if it fails the error
/// is returned instead of an image. After that, failing pixels are painted
/// with `ERROR_COLOR` and counted.
pub fn render_image(program: &Program, options: &RenderOptions) -> Result<Image> {
    let width = options.width as usize;
    let height = options.height as usize;
    let runtime = options.runtime();
    let resolution = Operand::Vector(vec![options.width as f64, options.height as f64]);

    if width > 0 && height > 0 {
        shade(program, &runtime, options, &resolution, 0, 0)?;
    }

    let mut pixels = vec![0; width * height * 3];
    let workers = options.worker_count();
    let rows_per_band = height.div_ceil(workers).max(1);
    debug!(width, height, workers, "rendering");

    let failed = thread::scope(|s| {
        let handles: Vec<_> = pixels
            .chunks_mut((rows_per_band * width * 3).max(1))
            .enumerate()
            .map(|(band, rows)| {
                let runtime = &runtime;
                let resolution = &resolution;
                s.spawn(move || {
                    let first_row = band * rows_per_band;
                    let mut failed = 0;
                    for (i, rgb) in rows.chunks_mut(3).enumerate() {
                        let x = i % width;
                        let y = first_row + i / width;
                        let color = shade(program, runtime, options, resolution, x, y)
                            .ok()
                            .flatten()
                            .unwrap_or_else(|| {
                                failed += 1;
                                ERROR_COLOR
                            });
                        rgb.copy_from_slice(&color);
                    }
                    debug!(band, failed, "band finished");
                    failed
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
            .sum::<usize>()
    });

    if failed > 0 {
        debug!(failed, "pixels fell back to the error colour");
    }
    Ok(Image {
        width: options.width,
        height: options.height,
        pixels,
        failed,
    })
}

/// Run the shader for image row `y`, column `x`. `Ok(None)` means the run
/// finished without a usable colour.
fn shade(
    program: &Program,
    runtime: &RuntimeConfig,
    options: &RenderOptions,
    resolution: &Operand,
    x: usize,
    y: usize,
) -> std::result::Result<Option<[u8; 3]>, RuntimeError> {
    // fragCoord has its origin at the bottom-left.
    let frag_coord = Operand::Vector(vec![x as f64, (options.height as usize - y) as f64]);

    let mut vm = Vm::new_with_config(runtime, Box::new(io::sink()));
    vm.add_uniform("fragCoord", frag_coord);
    vm.add_uniform("iResolution", resolution.clone());
    vm.add_uniform("iTime", Operand::Float(options.time));
    vm.run(program)?;

    Ok(vm.retval().and_then(to_color))
}

fn to_color(value: &Operand) -> Option<[u8; 3]> {
    let floats = value.floats().ok()?;
    if floats.len() < 3 {
        return None;
    }
    let channel = |f: f64| (f.clamp(0.0, 1.0) * 255.0) as u8;
    Some([channel(floats[0]), channel(floats[1]), channel(floats[2])])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::assemble;

    fn shader(body: &str) -> Program {
        assemble(&format!("call main\nhalt\nmain:\n{body}")).unwrap()
    }

    fn options(width: u32, height: u32, threads: usize) -> RenderOptions {
        RenderOptions {
            width,
            height,
            threads,
            ..Default::default()
        }
    }

    #[test]
    fn test_solid_colour() {
        let program = shader("ret 1.0, 0.5, 0.0");
        let image = render_image(&program, &options(4, 3, 2)).unwrap();
        assert_eq!(image.failed, 0);
        assert_eq!(image.pixels.len(), 4 * 3 * 3);
        assert_eq!(image.pixel(3, 2), Some([255, 127, 0]));
        assert_eq!(image.pixel(4, 0), None);
    }

    #[test]
    fn test_uniforms_are_bound_per_pixel() {
        let source = "ld $c, $fragCoord, $iTime\ndiv $c, 4.0\nret $c";
        let image = render_image(
            &shader(source),
            &RenderOptions {
                time: 2.0,
                ..options(4, 4, 3)
            },
        )
        .unwrap();
        // Top-left row is y = 4 in fragCoord.
        assert_eq!(image.pixel(0, 0), Some([0, 255, 127]));
        assert_eq!(image.pixel(2, 3), Some([127, 63, 127]));
    }

    #[test]
    fn test_short_retval_uses_error_colour() {
        let source = "ld $x, $fragCoord[0]\njmp_z $x, fine\nret 1.0\nfine:\nret 1.0, 1.0, 1.0";
        let image = render_image(&shader(source), &options(3, 2, 1)).unwrap();
        assert_eq!(image.failed, 4);
        assert_eq!(image.pixel(0, 1), Some([255, 255, 255]));
        assert_eq!(image.pixel(1, 1), Some(ERROR_COLOR));
    }

    #[test]
    fn test_failing_first_pixel_is_an_error() {
        let program = shader("ld $a, 1\ndiv $a, 0\nret $a, $a, $a");
        let err = render_image(&program, &options(2, 2, 1)).unwrap_err();
        assert!(matches!(err, Error::Runtime(_)), "{}", err);
    }

    #[test]
    fn test_thread_count_does_not_change_the_image() {
        let source = "ld $uv, $fragCoord\ndiv $uv, $iResolution\nret $uv, 0.25";
        let program = shader(source);
        let single = render_image(&program, &options(7, 5, 1)).unwrap();
        let many = render_image(&program, &options(7, 5, 4)).unwrap();
        assert_eq!(single, many);
    }

    #[test]
    fn test_ppm_header() {
        let program = shader("ret 0.0, 0.0, 1.0");
        let image = render_image(&program, &options(2, 1, 0)).unwrap();
        let mut out = Vec::new();
        image.write_ppm_to(&mut out).unwrap();
        assert!(out.starts_with(b"P6\n2 1\n255\n"));
        assert_eq!(&out[out.len() - 6..], &[0, 0, 255, 0, 0, 255]);
    }
}
