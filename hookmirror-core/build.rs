fn main() {
    built::write_built_file().expect("Failed to acquire build-time information");

    // Pass through HOOKMIRROR_GIT_HASH from the packaging environment
    println!("cargo:rerun-if-env-changed=HOOKMIRROR_GIT_HASH");
    if let Ok(hash) = std::env::var("HOOKMIRROR_GIT_HASH") {
        println!("cargo:rustc-env=HOOKMIRROR_GIT_HASH={}", hash);
    }
}
