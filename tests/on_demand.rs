//! End-to-end on-demand generation with the real image backend.
//!
//! Each test builds a library in a temp dir, writes real JPEG originals, and
//! drives the not-found hook the way the HTTP host does.

use sizes_on_demand::deferral::UploadSizeDeferral;
use sizes_on_demand::imaging::{Quality, RustBackend};
use sizes_on_demand::intercept::{Outcome, RequestInterceptor};
use sizes_on_demand::library::{AssetIndex, LibraryStore};
use sizes_on_demand::materialize::SizeMaterializer;
use sizes_on_demand::naming::NamingConvention;
use sizes_on_demand::resolve::AssetResolver;
use sizes_on_demand::response::{ContentTypePolicy, ResponseEmitter};
use sizes_on_demand::sizes::{CropMode, SizeDefinition, SizeRegistry};
use sizes_on_demand::upload::Uploader;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const BASE_URL: &str = "/wp-content/uploads";

fn write_jpeg(path: &Path, width: u32, height: u32) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    })
    .save_with_format(path, image::ImageFormat::Jpeg)
    .unwrap();
}

fn registry() -> Arc<SizeRegistry> {
    Arc::new(SizeRegistry::new(
        vec![SizeDefinition::new("thumbnail", 150, 150, CropMode::Fill)],
        vec![
            SizeDefinition::new("medium", 300, 200, CropMode::Fill),
            SizeDefinition::new("hero", 1000, 500, CropMode::Fill),
            SizeDefinition::new("wide", 600, 0, CropMode::Fit),
        ],
    ))
}

struct Site {
    tmp: TempDir,
    store: Arc<LibraryStore>,
    interceptor: RequestInterceptor<RustBackend>,
}

impl Site {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(LibraryStore::open(tmp.path(), BASE_URL).unwrap());
        let interceptor = RequestInterceptor::new(
            NamingConvention::new("wp-content").unwrap(),
            AssetResolver::new(store.clone(), BASE_URL),
            SizeMaterializer::new(
                RustBackend::new(),
                store.clone(),
                registry(),
                Quality::default(),
                Duration::from_secs(60),
            ),
            ResponseEmitter::new(ContentTypePolicy::Extension),
            tmp.path(),
        );
        Site {
            tmp,
            store,
            interceptor,
        }
    }

    fn add_original(&self, file: &str, width: u32, height: u32) -> u64 {
        write_jpeg(&self.tmp.path().join(file), width, height);
        self.store.insert(file, "image/jpeg").unwrap()
    }

    fn uploads(&self) -> &Path {
        self.tmp.path()
    }
}

fn handled(outcome: Outcome) -> sizes_on_demand::response::ImageResponse {
    match outcome {
        Outcome::Handled(response) => response,
        Outcome::Declined => panic!("expected the request to be handled"),
    }
}

#[test]
fn missing_size_is_generated_and_streamed() {
    let site = Site::new();
    let id = site.add_original("2023/05/photo.jpg", 1200, 800);

    let response = handled(
        site.interceptor
            .on_not_found("/wp-content/uploads/2023/05/photo-300x200.jpg"),
    );
    let on_disk = site.uploads().join("2023/05/photo-300x200.jpg");
    assert_eq!(response.content_type, "image/jpeg");
    assert_eq!(response.content_length, fs::metadata(&on_disk).unwrap().len());

    let mut body = Vec::new();
    response.into_reader().read_to_end(&mut body).unwrap();
    assert_eq!(body, fs::read(&on_disk).unwrap());
    assert_eq!(image::image_dimensions(&on_disk).unwrap(), (300, 200));

    // Siblings are on disk and recorded.
    let stored = site.store.attachment(id).unwrap().metadata;
    assert_eq!(stored.sizes.len(), 4);
    for record in stored.sizes.values() {
        let path = site.uploads().join("2023/05").join(&record.file);
        assert_eq!(
            image::image_dimensions(&path).unwrap(),
            (record.width, record.height),
            "{}",
            record.file
        );
    }
    assert_eq!(stored.sizes["wide"].file, "photo-600x400.jpg");
}

#[test]
fn sibling_request_regenerates_identical_records() {
    let site = Site::new();
    let id = site.add_original("2023/05/photo.jpg", 1200, 800);
    handled(
        site.interceptor
            .on_not_found("/wp-content/uploads/2023/05/photo-300x200.jpg"),
    );
    let before = site.store.attachment(id).unwrap().metadata;

    // Requesting a sibling regenerates the same records.
    handled(
        site.interceptor
            .on_not_found("/wp-content/uploads/2023/05/photo-1000x500.jpg"),
    );
    assert_eq!(site.store.attachment(id).unwrap().metadata, before);
}

#[test]
fn width_only_request_resolves_height() {
    let site = Site::new();
    site.add_original("2023/05/photo.jpg", 1200, 800);

    let response = handled(
        site.interceptor
            .on_not_found("/wp-content/uploads/2023/05/photo-600x.jpg"),
    );
    assert!(response.path.ends_with("photo-600x400.jpg"));
}

#[test]
fn unknown_original_declines_without_side_effects() {
    let site = Site::new();
    let id = site.add_original("2023/05/photo.jpg", 1200, 800);

    let outcome = site
        .interceptor
        .on_not_found("/wp-content/uploads/2023/05/missing-300x200.jpg");
    assert!(!outcome.is_handled());
    assert!(site.store.attachment(id).unwrap().metadata.sizes.is_empty());
    assert!(!site.uploads().join("2023/05/photo-300x200.jpg").exists());
}

#[test]
fn corrupt_original_declines_without_mutation() {
    let site = Site::new();
    let dir = site.uploads().join("2023/05");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("broken.jpg"), b"not a jpeg").unwrap();
    let id = site.store.insert("2023/05/broken.jpg", "image/jpeg").unwrap();

    let outcome = site
        .interceptor
        .on_not_found("/wp-content/uploads/2023/05/broken-300x200.jpg");
    assert!(!outcome.is_handled());
    assert!(site.store.attachment(id).unwrap().metadata.sizes.is_empty());
}

#[test]
fn deferred_upload_stub_is_served_on_first_request() {
    let site = Site::new();
    let incoming = TempDir::new().unwrap();
    let source = incoming.path().join("landscape.jpg");
    write_jpeg(&source, 1200, 800);

    let uploader = Uploader::new(
        RustBackend::new(),
        site.store.clone(),
        registry(),
        UploadSizeDeferral::new(true),
        site.uploads(),
        false,
        Quality::default(),
    );
    let report = uploader.ingest(&source).unwrap();
    assert_eq!(report.generated, vec!["thumbnail"]);
    assert_eq!(report.deferred, vec!["hero", "medium", "wide"]);

    let stub = site.store.attachment(report.id).unwrap().metadata.sizes["hero"].clone();
    assert_eq!(stub.file, "landscape-1000x500.jpg");
    assert!(!site.uploads().join(&stub.file).exists());

    let url = format!("{BASE_URL}/{}", stub.file);
    let response = handled(site.interceptor.on_not_found(&url));
    assert_eq!(response.path, site.uploads().join("landscape-1000x500.jpg"));
    assert_eq!(
        image::image_dimensions(&response.path).unwrap(),
        (stub.width, stub.height)
    );
    assert_eq!(
        site.store.attachment(report.id).unwrap().metadata.sizes["hero"],
        stub
    );
}
