//! Build and read the tar streams that cross the container boundary.

use std::io::Read;

/// Tar archive holding `files` as regular entries, in order.
pub fn tar_archive(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, name, *content)
            .expect("append tar entry");
    }
    builder.into_inner().expect("finish tar archive")
}

/// Every entry of `archive` as `(path, content)`.
pub fn tar_entries(archive: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut archive = tar::Archive::new(archive);
    archive
        .entries()
        .expect("read tar entries")
        .map(|entry| {
            let mut entry = entry.expect("read tar entry");
            let name = entry
                .path()
                .expect("tar entry path")
                .to_string_lossy()
                .into_owned();
            let mut content = Vec::new();
            entry.read_to_end(&mut content).expect("read tar entry content");
            (name, content)
        })
        .collect()
}
