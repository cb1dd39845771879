use which::which;

/// Rebuilds the probe whenever the `bpf-linker` found on $PATH changes. cargo
/// cannot track the linker as a dependency while artifact dependencies stay
/// unstable.
fn main() {
    let bpf_linker = which("bpf-linker").expect("bpf-linker not found in $PATH");
    println!("cargo:rerun-if-changed={}", bpf_linker.display());
}
