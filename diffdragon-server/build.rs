fn main() {
    built::write_built_file().expect("Failed to acquire build-time information");

    // Packaged builds without a .git directory pass the hash explicitly.
    println!("cargo:rerun-if-env-changed=DIFFDRAGON_GIT_HASH");
    if let Ok(hash) = std::env::var("DIFFDRAGON_GIT_HASH") {
        println!("cargo:rustc-env=DIFFDRAGON_GIT_HASH={}", hash);
    }
}
