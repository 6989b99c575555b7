use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context};
use image::DynamicImage;
use serde::Deserialize;

use crate::render::BoundingBox;

#[derive(Deserialize)]
struct TownFile {
    visual: Visual,
}

#[derive(Deserialize)]
struct Visual {
    #[serde(rename = "boundingBox")]
    bounding_box: [f64; 4],
}

/// Static map of one town and the lon/lat extent it covers.
#[derive(Debug, Clone, PartialEq)]
pub struct TownConfig {
    pub name: String,
    pub image_path: PathBuf,
    pub extent: BoundingBox,
}

impl TownConfig {
    pub fn load_image(&self) -> anyhow::Result<DynamicImage> {
        image::open(&self.image_path)
            .with_context(|| format!("Failed to read map of {}", self.name))
    }
}

fn find_files_with_extension<P: AsRef<Path>>(dir: P, extension: &str) -> anyhow::Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let mut paths = std::fs::read_dir(dir)
        .with_context(|| format!("Cannot list {}", dir.display()))?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .map_or(false, |ext| ext.to_ascii_lowercase() == extension)
        })
        .collect::<Vec<_>>();
    paths.sort();
    Ok(paths)
}

/// Reads every town under `assets`: each `imgs/<Name>.png` pairs with a
/// `<name>.json` holding `visual.boundingBox`.
pub fn load_towns<P: AsRef<Path>>(assets: P) -> anyhow::Result<Vec<TownConfig>> {
    let assets = assets.as_ref();
    let images = find_files_with_extension(assets.join("imgs"), "png")?;
    if images.is_empty() {
        return Err(anyhow!("No town map found in {}", assets.join("imgs").display()));
    }

    images
        .into_iter()
        .map(|image_path| -> anyhow::Result<TownConfig> {
            let name = image_path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Map file name should be valid UTF-8")?
                .to_owned();

            let json_path = assets.join(format!("{}.json", name.to_lowercase()));
            let f = File::open(&json_path)
                .with_context(|| format!("Cannot find {}", json_path.display()))?;
            let town: TownFile = serde_json::from_reader(BufReader::new(f))
                .with_context(|| format!("Invalid town file {}", json_path.display()))?;

            let extent = BoundingBox::from_array(town.visual.bounding_box);
            if !extent.is_valid() {
                return Err(anyhow!("Bounding box of {name} is empty or inverted"));
            }

            Ok(TownConfig {
                name,
                image_path,
                extent,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use image::{Rgba, RgbaImage};

    use super::*;

    fn write_town(assets: &Path, name: &str, bbox: &str) {
        fs::create_dir_all(assets.join("imgs")).unwrap();
        RgbaImage::from_pixel(4, 4, Rgba([255, 255, 255, 255]))
            .save(assets.join("imgs").join(format!("{name}.png")))
            .unwrap();
        fs::write(
            assets.join(format!("{}.json", name.to_lowercase())),
            format!(r#"{{"api": "unused", "visual": {{"boundingBox": {bbox}}}}}"#),
        )
        .unwrap();
    }

    #[test]
    fn test_load_towns() {
        let dir = tempfile::tempdir().unwrap();
        write_town(dir.path(), "Lyon", "[4.77, 4.92, 45.70, 45.80]");
        write_town(dir.path(), "Lille", "[2.98, 3.16, 50.58, 50.68]");

        let towns = load_towns(dir.path()).unwrap();
        assert_eq!(
            towns.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            vec!["Lille", "Lyon"]
        );
        assert_eq!(towns[1].extent.lat_max, 45.80);
        assert_eq!(towns[0].load_image().unwrap().width(), 4);
    }

    #[test]
    fn test_missing_town_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_town(dir.path(), "Lyon", "[4.77, 4.92, 45.70, 45.80]");
        fs::remove_file(dir.path().join("lyon.json")).unwrap();

        let err = load_towns(dir.path()).unwrap_err();
        assert!(err.to_string().contains("lyon.json"));
    }

    #[test]
    fn test_inverted_bounding_box_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_town(dir.path(), "Lyon", "[4.92, 4.77, 45.70, 45.80]");
        assert!(load_towns(dir.path()).is_err());
    }

    #[test]
    fn test_no_maps_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("imgs")).unwrap();
        assert!(load_towns(dir.path()).is_err());
    }
}
