//! Keel xtask - Build automation tasks
//!
//! ## Usage
//!
//! ```bash
//! # Build the keel binary
//! cargo xtask build
//!
//! # Run all tests
//! cargo xtask test
//!
//! # Run lints
//! cargo xtask lint
//!
//! # Print the apply plan for the sample cluster document
//! cargo xtask smoke
//!
//! # Everything CI runs
//! cargo xtask ci
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use xshell::{cmd, Shell};

/// Sample cluster document used by the smoke check
const SAMPLE_CONFIG: &str = "demos/keel.yaml";

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Build automation for Keel")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the keel binary
    Build {
        /// Build in release mode
        #[arg(long)]
        release: bool,
    },
    /// Run all tests
    Test {
        /// Run tests in release mode
        #[arg(long)]
        release: bool,
    },
    /// Run lints (clippy and rustfmt check)
    Lint,
    /// Format code
    Fmt {
        /// Check formatting without making changes
        #[arg(long)]
        check: bool,
    },
    /// Validate the sample cluster document and print its apply plan
    Smoke,
    /// Clean build artifacts
    Clean,
    /// Install keel locally
    Install,
    /// Build release artifacts
    Release,
    /// Generate documentation
    Doc {
        /// Open documentation in browser
        #[arg(long)]
        open: bool,
    },
    /// Run CI checks (fmt, lint, test, smoke, build)
    Ci,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;

    // Change to project root
    let project_root = project_root()?;
    sh.change_dir(&project_root);

    match cli.command {
        Commands::Build { release } => build(&sh, release)?,
        Commands::Test { release } => test(&sh, release)?,
        Commands::Lint => lint(&sh)?,
        Commands::Fmt { check } => fmt(&sh, check)?,
        Commands::Smoke => smoke(&sh)?,
        Commands::Clean => clean(&sh)?,
        Commands::Install => install(&sh)?,
        Commands::Release => release(&sh)?,
        Commands::Doc { open } => doc(&sh, open)?,
        Commands::Ci => ci(&sh)?,
    }

    Ok(())
}

fn project_root() -> Result<PathBuf> {
    let output = std::process::Command::new("cargo")
        .args(["locate-project", "--workspace", "--message-format=plain"])
        .output()
        .context("Failed to run cargo locate-project")?;

    let path = String::from_utf8(output.stdout)?;
    let manifest = PathBuf::from(path.trim());
    manifest
        .parent()
        .map(|p| p.to_path_buf())
        .context("Failed to find project root")
}

fn build(sh: &Shell, release: bool) -> Result<()> {
    println!("🔨 Building keel...");
    if release {
        cmd!(sh, "cargo build --release --bin keel").run()?;
    } else {
        cmd!(sh, "cargo build --bin keel").run()?;
    }
    println!("✅ Build complete!");
    Ok(())
}

fn test(sh: &Shell, release: bool) -> Result<()> {
    println!("🧪 Running tests...");
    if release {
        cmd!(sh, "cargo test --workspace --release").run()?;
    } else {
        cmd!(sh, "cargo test --workspace").run()?;
    }
    println!("✅ All tests passed!");
    Ok(())
}

fn lint(sh: &Shell) -> Result<()> {
    println!("🔍 Running lints...");
    cmd!(sh, "cargo clippy --workspace --all-targets -- -D warnings").run()?;
    println!("✅ All lints passed!");
    Ok(())
}

fn fmt(sh: &Shell, check: bool) -> Result<()> {
    println!("🎨 Formatting code...");
    if check {
        cmd!(sh, "cargo fmt --all -- --check").run()?;
    } else {
        cmd!(sh, "cargo fmt --all").run()?;
    }
    println!("✅ Formatting complete!");
    Ok(())
}

fn smoke(sh: &Shell) -> Result<()> {
    println!("💨 Checking {}...", SAMPLE_CONFIG);
    if !Path::new(SAMPLE_CONFIG).exists() {
        anyhow::bail!("{} not found", SAMPLE_CONFIG);
    }
    cmd!(sh, "cargo run --quiet --bin keel -- validate --config {SAMPLE_CONFIG}").run()?;
    cmd!(sh, "cargo run --quiet --bin keel -- plan --config {SAMPLE_CONFIG}").run()?;
    println!("✅ Smoke check passed!");
    Ok(())
}

fn clean(sh: &Shell) -> Result<()> {
    println!("🧹 Cleaning build artifacts...");
    cmd!(sh, "cargo clean").run()?;
    let _ = std::fs::remove_dir_all("target/release-artifacts");
    println!("✅ Clean complete!");
    Ok(())
}

fn install(sh: &Shell) -> Result<()> {
    println!("📥 Installing keel locally...");
    cmd!(sh, "cargo install --path . --bin keel").run()?;
    println!("✅ Installation complete!");
    Ok(())
}

fn release(sh: &Shell) -> Result<()> {
    println!("🚀 Building release artifacts...");
    build(sh, true)?;

    let release_dir = Path::new("target/release-artifacts");
    if release_dir.exists() {
        std::fs::remove_dir_all(release_dir)?;
    }
    std::fs::create_dir_all(release_dir)?;

    std::fs::copy("target/release/keel", release_dir.join("keel"))
        .context("release binary missing")?;
    println!("  Copied keel");

    std::fs::copy(SAMPLE_CONFIG, release_dir.join("keel.yaml"))?;
    println!("  Copied sample configuration");

    println!("✅ Release artifacts ready in target/release-artifacts/");
    Ok(())
}

fn doc(sh: &Shell, open: bool) -> Result<()> {
    println!("📚 Generating documentation...");
    if open {
        cmd!(sh, "cargo doc --no-deps --open").run()?;
    } else {
        cmd!(sh, "cargo doc --no-deps").run()?;
    }
    println!("✅ Documentation generated!");
    Ok(())
}

fn ci(sh: &Shell) -> Result<()> {
    println!("🔄 Running CI checks...");

    println!("\n📋 Step 1/5: Format check");
    fmt(sh, true)?;

    println!("\n📋 Step 2/5: Lint");
    lint(sh)?;

    println!("\n📋 Step 3/5: Tests");
    test(sh, false)?;

    println!("\n📋 Step 4/5: Smoke check");
    smoke(sh)?;

    println!("\n📋 Step 5/5: Release build");
    build(sh, true)?;

    println!("\n✅ All CI checks passed!");
    Ok(())
}
