// CLI for inspecting and exercising the generated alpha-blend kernel: dump prints
// the machine code as hex plus a NASM-flavor disassembly (the trailing data pool
// decodes as garbage instructions, which is expected), check compares the kernel
// against the scalar reference over every destination alignment, and bench measures
// kernel versus reference throughput on patterned buffers.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "blendjit", about = "Generate and exercise the SSE2 alpha-blend kernel")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the generated kernel as hex and disassembly.
    Dump,
    /// Compare the kernel against the scalar reference.
    Check {
        /// Pixel count per run (every destination alignment is tried).
        #[arg(long, default_value_t = 1009)]
        pixels: usize,
    },
    /// Measure kernel vs reference throughput.
    Bench {
        /// Pixels per iteration.
        #[arg(long, default_value_t = 1 << 16)]
        pixels: usize,
        /// Iterations per side.
        #[arg(long, default_value_t = 200)]
        iters: usize,
    },
}

#[cfg(all(unix, target_arch = "x86_64"))]
fn main() -> Result<(), blendjit::BuildError> {
    use blendjit::{BlendKernel, BuildSession};
    use bumpalo::Bump;

    env_logger::init();
    let cli = Cli::parse();

    let arena = Bump::new();
    let session = BuildSession::new(&arena);
    let kernel = BlendKernel::compile(&session)?;

    match cli.command {
        Command::Dump => dump(&kernel),
        Command::Check { pixels } => check(&kernel, pixels),
        Command::Bench { pixels, iters } => bench(&kernel, pixels, iters),
    }
    Ok(())
}

#[cfg(all(unix, target_arch = "x86_64"))]
fn dump(kernel: &blendjit::BlendKernel) {
    use iced_x86::{Decoder, DecoderOptions, Formatter, NasmFormatter};

    let bytes = kernel.kernel().code_bytes();
    let entry = kernel.kernel().entry_ptr() as u64;

    println!("; {} bytes at {entry:#x}", bytes.len());
    for (i, chunk) in bytes.chunks(16).enumerate() {
        print!("{:08x}:", i * 16);
        for byte in chunk {
            print!(" {byte:02x}");
        }
        println!();
    }
    println!();

    let mut decoder = Decoder::with_ip(64, bytes, entry, DecoderOptions::NONE);
    let mut formatter = NasmFormatter::new();
    let mut line = String::new();
    for instruction in &mut decoder {
        line.clear();
        formatter.format(&instruction, &mut line);
        println!("{:016x} {line}", instruction.ip());
    }
}

#[cfg(all(unix, target_arch = "x86_64"))]
fn check(kernel: &blendjit::BlendKernel, pixels: usize) {
    use blendjit::blend::reference;

    let mut failures = 0usize;
    for align in 0..4usize {
        let len = pixels * 4;
        let mut src = vec![0u8; len];
        fill_pattern(&mut src, 0x5EED_0001 + align as u32);

        let mut backing = vec![0u8; len + 64];
        let base = backing.as_ptr() as usize;
        let start = (16 - base % 16) % 16 + align * 4;
        fill_pattern(&mut backing, 0xC0FF_EE00);
        let mut expected = backing.clone();

        kernel.blend(&mut backing[start..start + len], &src);
        reference::blend_in_place(&mut expected[start..start + len], &src);

        if backing == expected {
            println!("alignment +{:2}: ok ({pixels} pixels)", align * 4);
        } else {
            failures += 1;
            println!("alignment +{:2}: MISMATCH", align * 4);
        }
    }
    if failures > 0 {
        std::process::exit(1);
    }
}

#[cfg(all(unix, target_arch = "x86_64"))]
fn bench(kernel: &blendjit::BlendKernel, pixels: usize, iters: usize) {
    use blendjit::blend::reference;
    use std::time::Instant;

    let len = pixels * 4;
    let mut src = vec![0u8; len];
    fill_pattern(&mut src, 0xBE5E_11E5);
    let mut dst = vec![0u8; len];
    fill_pattern(&mut dst, 0xDE57_0000);

    let start = Instant::now();
    for _ in 0..iters {
        kernel.blend(&mut dst, &src);
    }
    let jit = start.elapsed();

    let start = Instant::now();
    for _ in 0..iters {
        reference::blend_in_place(&mut dst, &src);
    }
    let scalar = start.elapsed();

    let mpix = |elapsed: std::time::Duration| {
        (pixels * iters) as f64 / elapsed.as_secs_f64() / 1.0e6
    };
    println!("kernel:    {:>10.1} Mpix/s", mpix(jit));
    println!("reference: {:>10.1} Mpix/s", mpix(scalar));
}

#[cfg(all(unix, target_arch = "x86_64"))]
fn fill_pattern(buf: &mut [u8], mut state: u32) {
    for byte in buf.iter_mut() {
        state = state.wrapping_mul(1664525).wrapping_add(1013904223);
        *byte = (state >> 24) as u8;
    }
}

#[cfg(not(all(unix, target_arch = "x86_64")))]
fn main() {
    let _ = Cli::parse();
    eprintln!("blendjit kernels run on x86-64 unix hosts only");
    std::process::exit(1);
}
