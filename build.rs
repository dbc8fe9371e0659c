use std::path::Path;

// Return the first existing path given a list of paths as string slices
fn get_first_path(paths: &[&'static str]) -> Option<&'static str> {
    paths.iter().find(|p| Path::new(p).exists()).copied()
}

fn main() {
    let path_iolog_dir: &str =
        get_first_path(&["/var/log/sudo-io", "/var/adm/sudo-io", "/var/log/sudo"])
            .unwrap_or("/var/log/sudo-io");

    let path_relay_dir: &str =
        get_first_path(&["/var/log/sudo_logsrvd", "/var/adm/sudo_logsrvd"])
            .unwrap_or("/var/log/sudo_logsrvd");

    println!("cargo:rustc-env=PATH_IOLOG_DIR={path_iolog_dir}");
    println!("cargo:rustc-env=PATH_RELAY_DIR={path_relay_dir}");
    println!("cargo:rerun-if-changed=build.rs");
}
