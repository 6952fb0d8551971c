use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek};
use std::path::Path;

use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;
use tiff::ColorType;
use tracing::debug;

use crate::{
    error::{CoastlineError, Result},
    types::{BinaryMask, Crs, GeoTransform, Raster},
};

const GT_MODEL_TYPE: u16 = 1024;
const GT_RASTER_TYPE: u16 = 1025;
const GEOGRAPHIC_TYPE: u16 = 2048;
const PROJECTED_CS_TYPE: u16 = 3072;
const USER_DEFINED: u16 = 32767;
const MODEL_PROJECTED: u16 = 1;
const MODEL_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;
const RASTER_PIXEL_IS_POINT: u16 = 2;

/// Loads a raster by extension: GeoTIFF, or a plain 8-bit image in pixel space.
pub fn read_raster<P: AsRef<Path>>(path: P) -> Result<Raster> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "tif" | "tiff" => read_geotiff(path),
        "png" | "jpg" | "jpeg" => read_image(path),
        _ => Err(CoastlineError::Input(format!(
            "unsupported raster format: {}",
            path.display()
        ))),
    }
}

/// Plain image as a single band with an identity transform and `LOCAL` CRS.
pub fn read_image<P: AsRef<Path>>(path: P) -> Result<Raster> {
    let image = image::open(path)?.to_luma8();
    let (width, height) = (image.width() as usize, image.height() as usize);
    let data = image.into_raw().into_iter().map(f32::from).collect();
    Raster::new(width, height, data, GeoTransform::IDENTITY, Crs::local())
}

pub fn read_geotiff<P: AsRef<Path>>(path: P) -> Result<Raster> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| CoastlineError::Input(format!("cannot open {}: {e}", path.display())))?;
    let mut decoder = Decoder::new(BufReader::new(file))?;

    match decoder.colortype()? {
        ColorType::Gray(_) => {}
        other => {
            return Err(CoastlineError::Input(format!(
                "{} is not single-band ({other:?})",
                path.display()
            )));
        }
    }

    let (width, height) = decoder.dimensions()?;
    let geo_keys = read_geo_keys(&mut decoder)?;
    let mut transform = read_transform(&mut decoder)?;
    if geo_key(&geo_keys, GT_RASTER_TYPE) == Some(RASTER_PIXEL_IS_POINT) {
        // Tie points name pixel centres; shift to the upper-left corner.
        let c = &mut transform.0;
        c[0] -= 0.5 * c[1] + 0.5 * c[2];
        c[3] -= 0.5 * c[4] + 0.5 * c[5];
    }
    let crs = crs_from_keys(&geo_keys);
    let nodata = read_nodata(&mut decoder)?;

    let data: Vec<f32> = match decoder.read_image()? {
        DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
        #[allow(unreachable_patterns)]
        _ => {
            return Err(CoastlineError::Input(format!(
                "{}: unsupported sample format",
                path.display()
            )));
        }
    };

    debug!(
        path = %path.display(),
        width,
        height,
        crs = %crs,
        ?nodata,
        "read geotiff"
    );
    Ok(Raster::new(width as usize, height as usize, data, transform, crs)?.with_nodata(nodata))
}

fn read_geo_keys<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<Vec<u16>> {
    Ok(match decoder.find_tag(Tag::GeoKeyDirectoryTag)? {
        Some(value) => value.into_u16_vec()?,
        None => Vec::new(),
    })
}

/// Inline value of a GeoKey; keys stored in other tags are ignored.
fn geo_key(directory: &[u16], key: u16) -> Option<u16> {
    let count = *directory.get(3)? as usize;
    directory
        .get(4..)?
        .chunks_exact(4)
        .take(count)
        .find(|entry| entry[0] == key && entry[1] == 0)
        .map(|entry| entry[3])
}

fn crs_from_keys(directory: &[u16]) -> Crs {
    [PROJECTED_CS_TYPE, GEOGRAPHIC_TYPE]
        .into_iter()
        .filter_map(|key| geo_key(directory, key))
        .find(|&code| code != 0 && code != USER_DEFINED)
        .map(|code| Crs::epsg(code as u32))
        .unwrap_or_else(Crs::local)
}

fn read_transform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<GeoTransform> {
    if let Some(value) = decoder.find_tag(Tag::ModelTransformationTag)? {
        let m = value.into_f64_vec()?;
        if m.len() < 8 {
            return Err(CoastlineError::Input(
                "ModelTransformation tag needs 16 values".to_string(),
            ));
        }
        return Ok(GeoTransform([m[3], m[0], m[1], m[7], m[4], m[5]]));
    }

    let scale = decoder.find_tag(Tag::ModelPixelScaleTag)?;
    let tiepoint = decoder.find_tag(Tag::ModelTiepointTag)?;
    match (scale, tiepoint) {
        (Some(scale), Some(tiepoint)) => {
            let scale = scale.into_f64_vec()?;
            let tie = tiepoint.into_f64_vec()?;
            if scale.len() < 2 || tie.len() < 6 {
                return Err(CoastlineError::Input(
                    "malformed ModelPixelScale or ModelTiepoint tag".to_string(),
                ));
            }
            let (i, j, x, y) = (tie[0], tie[1], tie[3], tie[4]);
            let (sx, sy) = (scale[0], scale[1]);
            Ok(GeoTransform([x - i * sx, sx, 0.0, y + j * sy, 0.0, -sy]))
        }
        _ => Ok(GeoTransform::IDENTITY),
    }
}

fn read_nodata<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<Option<f64>> {
    let Some(value) = decoder.find_tag(Tag::GdalNodata)? else {
        return Ok(None);
    };
    let text = value.into_string()?;
    let text = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    match text {
        "" => Ok(None),
        "nan" | "NaN" | "-nan" => Ok(Some(f64::NAN)),
        _ => text
            .parse()
            .map(Some)
            .map_err(|_| CoastlineError::Input(format!("unreadable GDAL_NODATA value {text:?}"))),
    }
}

fn transform_tags(transform: &GeoTransform) -> Vec<(Tag, Vec<f64>)> {
    let c = transform.coefficients();
    if transform.is_north_up() {
        vec![
            (Tag::ModelPixelScaleTag, vec![c[1], -c[5], 0.0]),
            (Tag::ModelTiepointTag, vec![0.0, 0.0, 0.0, c[0], c[3], 0.0]),
        ]
    } else {
        vec![(
            Tag::ModelTransformationTag,
            vec![
                c[1], c[2], 0.0, c[0], //
                c[4], c[5], 0.0, c[3], //
                0.0, 0.0, 0.0, 0.0, //
                0.0, 0.0, 0.0, 1.0,
            ],
        )]
    }
}

fn geo_key_directory(crs: &Crs) -> Option<Vec<u16>> {
    let code = u16::try_from(crs.epsg_code()?).ok()?;
    // EPSG codes 4000..5000 are geographic systems.
    let (model, key) = if (4000..5000).contains(&code) {
        (MODEL_GEOGRAPHIC, GEOGRAPHIC_TYPE)
    } else {
        (MODEL_PROJECTED, PROJECTED_CS_TYPE)
    };
    Some(vec![
        1, 1, 0, 3, //
        GT_MODEL_TYPE, 0, 1, model, //
        GT_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA, //
        key, 0, 1, code,
    ])
}

/// Writes a single-band float GeoTIFF carrying transform, CRS and nodata.
pub fn write_geotiff<P: AsRef<Path>>(raster: &Raster, path: P) -> Result<()> {
    let file = BufWriter::new(File::create(path.as_ref())?);
    let mut encoder = TiffEncoder::new(file)?;
    let mut image = encoder.new_image::<colortype::Gray32Float>(raster.width() as u32, raster.height() as u32)?;

    for (tag, values) in transform_tags(raster.transform()) {
        image.encoder().write_tag(tag, &values[..])?;
    }
    if let Some(keys) = geo_key_directory(raster.crs()) {
        image.encoder().write_tag(Tag::GeoKeyDirectoryTag, &keys[..])?;
    }
    if let Some(nodata) = raster.nodata() {
        image.encoder().write_tag(Tag::GdalNodata, nodata.to_string().as_str())?;
    }
    image.write_data(raster.data())?;
    debug!(path = %path.as_ref().display(), "wrote geotiff");
    Ok(())
}

/// Writes a mask as an 8-bit GeoTIFF.
pub fn write_mask_geotiff<P: AsRef<Path>>(mask: &BinaryMask, path: P) -> Result<()> {
    let file = BufWriter::new(File::create(path.as_ref())?);
    let mut encoder = TiffEncoder::new(file)?;
    let mut image = encoder.new_image::<colortype::Gray8>(mask.width() as u32, mask.height() as u32)?;

    for (tag, values) in transform_tags(mask.transform()) {
        image.encoder().write_tag(tag, &values[..])?;
    }
    if let Some(keys) = geo_key_directory(mask.crs()) {
        image.encoder().write_tag(Tag::GeoKeyDirectoryTag, &keys[..])?;
    }
    image.write_data(mask.image().as_raw())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::tempdir;

    fn sample_raster(transform: GeoTransform, crs: Crs) -> Raster {
        let data: Vec<f32> = (0..12).map(|i| i as f32 * 0.25 - 1.0).collect();
        Raster::new(4, 3, data, transform, crs).unwrap()
    }

    #[test]
    fn north_up_raster_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ndwi.tif");
        let raster = sample_raster(GeoTransform::north_up(500_000.0, 450_000.0, 30.0, 30.0), Crs::epsg(32643))
            .with_nodata(Some(-9999.0));
        write_geotiff(&raster, &path).unwrap();

        let back = read_raster(&path).unwrap();
        assert_eq!(back.width(), 4);
        assert_eq!(back.height(), 3);
        assert_eq!(back.data(), raster.data());
        assert_eq!(back.crs(), &Crs::epsg(32643));
        assert_eq!(back.nodata(), Some(-9999.0));
        for (a, b) in back.transform().0.iter().zip(raster.transform().0) {
            assert_relative_eq!(*a, b);
        }
    }

    #[test]
    fn rotated_transform_uses_model_transformation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rotated.tif");
        let transform = GeoTransform([100.0, 10.0, 1.5, 200.0, -0.5, -10.0]);
        write_geotiff(&sample_raster(transform, Crs::epsg(4326)), &path).unwrap();

        let back = read_geotiff(&path).unwrap();
        assert_eq!(back.transform(), &transform);
        assert_eq!(back.crs(), &Crs::epsg(4326));
        assert_eq!(back.nodata(), None);
    }

    #[test]
    fn mask_is_written_as_eight_bit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mask.tif");
        let mask = BinaryMask::from_fn(5, 5, GeoTransform::IDENTITY, Crs::local(), |r, c| r == c);
        write_mask_geotiff(&mask, &path).unwrap();

        let back = read_geotiff(&path).unwrap();
        assert_eq!(back.get(2, 2), 255.0);
        assert_eq!(back.get(2, 3), 0.0);
        assert_eq!(back.crs(), &Crs::local());
    }

    #[test]
    fn png_loads_in_pixel_space() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mask.png");
        let image = image::GrayImage::from_fn(3, 2, |x, _| image::Luma([x as u8 * 100]));
        image.save(&path).unwrap();

        let raster = read_raster(&path).unwrap();
        assert_eq!(raster.data(), &[0.0, 100.0, 200.0, 0.0, 100.0, 200.0]);
        assert_eq!(raster.transform(), &GeoTransform::IDENTITY);
        assert_eq!(raster.crs(), &Crs::local());
    }

    #[test]
    fn missing_file_is_an_input_error() {
        let err = read_raster("/nonexistent/tile.tif").unwrap_err();
        assert!(err.is_input());
        assert!(matches!(read_raster("tile.xyz"), Err(CoastlineError::Input(_))));
    }

    #[test]
    fn pixel_is_point_shifts_half_a_pixel() {
        let keys = vec![1, 1, 0, 1, GT_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_POINT];
        assert_eq!(geo_key(&keys, GT_RASTER_TYPE), Some(RASTER_PIXEL_IS_POINT));
        assert_eq!(crs_from_keys(&keys), Crs::local());

        let keys = vec![1, 1, 0, 1, PROJECTED_CS_TYPE, 0, 1, 32643];
        assert_eq!(crs_from_keys(&keys), Crs::epsg(32643));
    }
}
