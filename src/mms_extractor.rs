use anyhow::{Context, Result};
use rayon::prelude::*;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use zip::ZipArchive;

/// Unpacks NEMWEB / MMSDM archives (including archives nested inside
/// archives) and gathers every MMS CSV into `<input_dir>/csv`.
pub struct MmsExtractor {
    input_dir: PathBuf,
    output_dir: PathBuf,
    processed_count: Arc<AtomicUsize>,
    csv_count: Arc<AtomicUsize>,
}

impl MmsExtractor {
    pub fn new(input_dir: PathBuf) -> Self {
        let output_dir = input_dir.join("csv");
        Self {
            input_dir,
            output_dir,
            processed_count: Arc::new(AtomicUsize::new(0)),
            csv_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn extract_all(&self) -> Result<usize> {
        println!("Creating output directory: {:?}", self.output_dir);
        fs::create_dir_all(&self.output_dir)?;

        let zip_files = find_zip_files(&self.input_dir)?;
        println!("Found {} ZIP files to process", zip_files.len());

        zip_files.par_iter().for_each(|zip_path| {
            if let Err(e) = self.process_zip_file(zip_path) {
                eprintln!("Error processing {:?}: {}", zip_path, e);
            }

            let count = self.processed_count.fetch_add(1, Ordering::SeqCst) + 1;
            if count % 100 == 0 {
                println!(
                    "Processed {} ZIP files, found {} CSV files so far",
                    count,
                    self.csv_count.load(Ordering::SeqCst)
                );
            }
        });

        let extracted = self.csv_count.load(Ordering::SeqCst);
        println!("\nExtraction complete!");
        println!("Processed {} ZIP files", self.processed_count.load(Ordering::SeqCst));
        println!("Extracted {} CSV files to {:?}", extracted, self.output_dir);

        Ok(extracted)
    }

    fn process_zip_file(&self, zip_path: &Path) -> Result<()> {
        let temp_dir = TempDir::new_in(&self.input_dir)?;
        extract_zip_recursive(zip_path, temp_dir.path())?;
        self.collect_csv_files(temp_dir.path())?;
        Ok(())
    }

    fn collect_csv_files(&self, dir: &Path) -> Result<()> {
        for entry in walkdir::WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_file() || !has_extension(path, "csv") {
                continue;
            }
            let Some(filename) = path.file_name() else { continue };
            let dest_path = self.output_dir.join(filename);

            if dest_path.exists() {
                fs::remove_file(&dest_path)?;
            }
            fs::rename(path, &dest_path)?;
            self.csv_count.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case(extension))
}

// NEMWEB publishes XML twins of some reports; only CSV content is wanted
fn is_xml_archive(path: &Path) -> bool {
    path.file_name()
        .and_then(|s| s.to_str())
        .map_or(false, |name| name.to_ascii_lowercase().contains("_xml.zip"))
}

fn find_zip_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut zip_files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && has_extension(&path, "zip") && !is_xml_archive(&path) {
            zip_files.push(path);
        }
    }
    zip_files.sort();
    Ok(zip_files)
}

fn extract_zip_recursive(zip_path: &Path, extract_to: &Path) -> Result<()> {
    let file = fs::File::open(zip_path)
        .with_context(|| format!("Failed to open ZIP file: {:?}", zip_path))?;
    let mut archive = ZipArchive::new(file)
        .with_context(|| format!("Failed to read ZIP archive: {:?}", zip_path))?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        // Entries with absolute or `..` paths are skipped
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else { continue };
        let outpath = extract_to.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&outpath)?;
            continue;
        }
        if let Some(p) = outpath.parent() {
            fs::create_dir_all(p)?;
        }
        let mut outfile = fs::File::create(&outpath)?;
        io::copy(&mut entry, &mut outfile)?;

        if has_extension(&outpath, "zip") && !is_xml_archive(&outpath) {
            if let Err(e) = extract_zip_recursive(&outpath, extract_to) {
                eprintln!("Failed to extract nested ZIP {:?}: {}", outpath, e);
            }
        }
    }
    Ok(())
}

pub fn extract_mms_archives(input_dir: PathBuf) -> Result<usize> {
    MmsExtractor::new(input_dir).extract_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;
    use zip::ZipWriter;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = fs::File::create(path).unwrap();
        let mut writer = ZipWriter::new(file);
        for (name, content) in entries {
            writer.start_file(*name, FileOptions::default()).unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_nested_archives_are_flattened_into_csv_dir() {
        let dir = TempDir::new().unwrap();
        let inner = dir.path().join("inner.zip.tmp");
        write_zip(&inner, &[("PUBLIC_DVD_DUALLOC_202201010000.CSV", b"C,HEADER\n")]);
        let inner_bytes = fs::read(&inner).unwrap();
        fs::remove_file(&inner).unwrap();

        write_zip(
            &dir.path().join("MMSDM_2022_01.zip"),
            &[
                ("nested/PUBLIC_DVD_DUALLOC_202201010000.zip", inner_bytes.as_slice()),
                ("PUBLIC_DVD_GENUNITS_202201010000.CSV", b"C,HEADER\n"),
            ],
        );
        write_zip(&dir.path().join("PUBLIC_DISPATCHSCADA_XML.zip"), &[("x.csv", b"")]);

        let extracted = extract_mms_archives(dir.path().to_path_buf()).unwrap();

        assert_eq!(extracted, 2);
        let csv_dir = dir.path().join("csv");
        assert!(csv_dir.join("PUBLIC_DVD_DUALLOC_202201010000.CSV").exists());
        assert!(csv_dir.join("PUBLIC_DVD_GENUNITS_202201010000.CSV").exists());
        assert!(!csv_dir.join("x.csv").exists());
    }
}
