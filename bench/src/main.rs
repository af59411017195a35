use serde::Serialize;
use std::path::Path;
use std::time::Instant;
use tetra::pipeline::compile_file;
use tetra::render::{RenderOptions, render_image};

const WIDTH: u32 = 128;
const HEIGHT: u32 = 72;

#[derive(Serialize)]
struct BenchmarkResult {
    name: String,
    pixels: u64,
    instructions_before: usize,
    instructions_after: usize,
    unoptimized_secs: f64,
    optimized_secs: f64,
    rust_time_secs: f64,
}

#[derive(Serialize)]
struct BenchmarkOutput {
    results: Vec<BenchmarkResult>,
}

// Rust reference implementations

fn rust_gradient(x: f64, y: f64, time: f64) -> [f64; 3] {
    let u = x / WIDTH as f64;
    let v = y / HEIGHT as f64;
    let theta = [u + time, 2.0 + v + time, 4.0 + u + time];
    theta.map(|t| t.cos() * 0.5 + 0.5)
}

fn rust_rings(x: f64, y: f64, time: f64) -> [f64; 3] {
    let u = (x - WIDTH as f64 * 0.5) / HEIGHT as f64;
    let v = (y - HEIGHT as f64 * 0.5) / HEIGHT as f64;
    let d = (u * u + v * v).sqrt();
    let s = (d * 40.0 - time).sin() * 0.5 + 0.5;
    [s, d, 0.25].map(|c| c.clamp(0.0, 1.0))
}

fn time_rust(shade: fn(f64, f64, f64) -> [f64; 3]) -> f64 {
    let start = Instant::now();
    let mut sum = 0.0;
    for y in 0..HEIGHT {
        for x in 0..WIDTH {
            sum += shade(x as f64, (HEIGHT - y) as f64, 1.0).iter().sum::<f64>();
        }
    }
    let elapsed = start.elapsed().as_secs_f64();
    eprintln!("{}", sum);
    elapsed
}

fn run_tetra_benchmark(shader: &str, optimize: bool) -> (f64, usize) {
    let path = format!("{}/shaders/{}.tasm", env!("CARGO_MANIFEST_DIR"), shader);

    let (program, _) = match compile_file(Path::new(&path), optimize) {
        Ok(compiled) => compiled,
        Err(e) => {
            eprintln!("Tetra benchmark {} (optimize={}) failed: {}", shader, optimize, e);
            return (0.0, 0);
        }
    };

    let options = RenderOptions {
        width: WIDTH,
        height: HEIGHT,
        time: 1.0,
        // Single worker so the timing reflects per-pixel cost.
        threads: 1,
        ..Default::default()
    };

    let start = Instant::now();
    let result = render_image(&program, &options);
    let elapsed = start.elapsed().as_secs_f64();

    match result {
        Ok(image) if image.failed > 0 => {
            eprintln!("Tetra benchmark {} (optimize={}): {} pixels failed", shader, optimize, image.failed)
        }
        Ok(_) => {}
        Err(e) => eprintln!("Tetra benchmark {} (optimize={}) failed: {}", shader, optimize, e),
    }

    (elapsed, program.len())
}

fn main() {
    let mut results = Vec::new();

    for (name, reference) in [
        ("gradient", rust_gradient as fn(f64, f64, f64) -> [f64; 3]),
        ("rings", rust_rings),
    ] {
        let rust_time = time_rust(reference);
        let (unoptimized, instructions_before) = run_tetra_benchmark(name, false);
        let (optimized, instructions_after) = run_tetra_benchmark(name, true);
        results.push(BenchmarkResult {
            name: name.to_string(),
            pixels: u64::from(WIDTH) * u64::from(HEIGHT),
            instructions_before,
            instructions_after,
            unoptimized_secs: unoptimized,
            optimized_secs: optimized,
            rust_time_secs: rust_time,
        });
    }

    let output = BenchmarkOutput { results };
    match serde_json::to_string_pretty(&output) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("failed to serialize results: {}", e),
    }
}
