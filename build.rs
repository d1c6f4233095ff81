pub fn main() {
    // Generate git version info using vergen
    generate_version_info();

    println!("cargo:rerun-if-changed=migrations");
}

/// Generate version information from git tags using vergen
///
/// The version is derived from `git describe --tags --always --dirty`:
/// - For tagged commits: the tag name (e.g., "v0.1.4")
/// - For commits after a tag: tag + commits + hash (e.g., "v0.1.4-2-ge930185")
/// - For dirty working trees: appends "-dirty"
///
/// Outside a git checkout the variables are simply not emitted and the binary
/// falls back to the Cargo package version (see `VERSION` in main.rs).
fn generate_version_info() {
    use vergen_git2::{BuildBuilder, CargoBuilder, Emitter, Git2Builder};

    let build = BuildBuilder::default()
        .build_timestamp(true)
        .build()
        .expect("Failed to configure build info");

    let cargo = CargoBuilder::default()
        .target_triple(true)
        .build()
        .expect("Failed to configure cargo info");

    let git2 = Git2Builder::default()
        .describe(true, true, None) // Enable describe with dirty flag, no pattern match
        .sha(true)
        .build()
        .expect("Failed to configure git info");

    let mut emitter = Emitter::default();
    let emitted = emitter
        .add_instructions(&build)
        .and_then(|e| e.add_instructions(&cargo))
        .and_then(|e| e.add_instructions(&git2))
        .and_then(|e| e.emit());

    if let Err(e) = emitted {
        println!("cargo:warning=Version info unavailable: {e}");
    }
}
