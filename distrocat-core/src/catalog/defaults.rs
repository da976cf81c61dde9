//! Built-in template list
//!
//! These entries are always present in the catalog. Losing or corrupting the
//! catalog file never removes them; they are re-inserted on the next load.

use once_cell::sync::Lazy;

use super::{Architecture, TemplateDescriptor};

static BUILTIN_DEFAULTS: Lazy<Vec<TemplateDescriptor>> = Lazy::new(|| {
    vec![
        TemplateDescriptor::new("ubuntu-24.04", "Ubuntu 24.04 LTS")
            .with_description("Ubuntu Noble Numbat WSL root filesystem")
            .with_version("24.04")
            .with_architecture(Architecture::X64)
            .with_source_url(
                "https://cloud-images.ubuntu.com/wsl/releases/24.04/current/ubuntu-noble-wsl-amd64-24.04lts.rootfs.tar.gz",
            )
            .with_size(340 * 1024 * 1024)
            .with_tags(["ubuntu", "lts", "official"]),
        TemplateDescriptor::new("ubuntu-22.04", "Ubuntu 22.04 LTS")
            .with_description("Ubuntu Jammy Jellyfish WSL root filesystem")
            .with_version("22.04")
            .with_architecture(Architecture::X64)
            .with_source_url(
                "https://cloud-images.ubuntu.com/wsl/releases/22.04/current/ubuntu-jammy-wsl-amd64-ubuntu22.04lts.rootfs.tar.gz",
            )
            .with_size(320 * 1024 * 1024)
            .with_tags(["ubuntu", "lts", "official"]),
        TemplateDescriptor::new("debian-12", "Debian 12")
            .with_description("Debian Bookworm minimal root filesystem")
            .with_version("12")
            .with_architecture(Architecture::X64)
            .with_source_url(
                "https://github.com/debuerreotype/docker-debian-artifacts/raw/dist-amd64/bookworm/rootfs.tar.xz",
            )
            .with_size(50 * 1024 * 1024)
            .with_tags(["debian", "stable", "official"]),
        TemplateDescriptor::new("alpine-3.19", "Alpine Linux 3.19")
            .with_description("Alpine mini root filesystem")
            .with_version("3.19.1")
            .with_architecture(Architecture::X64)
            .with_source_url(
                "https://dl-cdn.alpinelinux.org/alpine/v3.19/releases/x86_64/alpine-minirootfs-3.19.1-x86_64.tar.gz",
            )
            .with_size(3 * 1024 * 1024)
            .with_tags(["alpine", "minimal", "official"]),
        TemplateDescriptor::new("fedora-40", "Fedora 40")
            .with_description("Fedora container base root filesystem")
            .with_version("40")
            .with_architecture(Architecture::X64)
            .with_size(70 * 1024 * 1024)
            .with_tags(["fedora", "official"]),
    ]
});

/// The built-in template list
pub fn builtin_defaults() -> Vec<TemplateDescriptor> {
    BUILTIN_DEFAULTS.clone()
}
