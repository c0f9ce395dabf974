//! Output projection settings and the pixel box they define.

use crate::engine::{Gazetteer, GridData};
use map_common::{
    hash_combine, hash_f64, hash_value, BoundingBox, ConfigObject, CrsCode, CrsSpec, PixelBox, RenderError,
    RenderResult,
};
use projection::{CoordinateTransformation, EARTH_RADIUS_KM};
use std::f64::consts::PI;

const MAX_IMAGE_SIZE: i64 = 10000;

/// Projection keys read from one configuration level.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectionSettings {
    pub crs: Option<CrsSpec>,
    pub bboxcrs: Option<CrsCode>,
    pub xsize: Option<u32>,
    pub ysize: Option<u32>,
    pub x1: Option<f64>,
    pub y1: Option<f64>,
    pub x2: Option<f64>,
    pub y2: Option<f64>,
    pub cx: Option<f64>,
    pub cy: Option<f64>,
    pub resolution: Option<f64>,
    pub size: Option<f64>,
    /// `bbox` as given, axis order is resolved on merge
    pub bbox: Option<[f64; 4]>,
    /// Centre looked up by place name, in lon/lat
    pub place: Option<(f64, f64)>,
}

fn take_size(cfg: &mut ConfigObject, key: &str) -> RenderResult<Option<u32>> {
    match cfg.take_i64(key)? {
        None => Ok(None),
        Some(n) if n < 2 => Err(RenderError::config("Image size must be at least 2x2").with_param(key, n)),
        Some(n) if n > MAX_IMAGE_SIZE => Err(RenderError::config("Image size is too large")
            .with_param(key, n)
            .with_param("max", MAX_IMAGE_SIZE)),
        Some(n) => Ok(Some(n as u32)),
    }
}

fn parse_bbox(text: &str) -> RenderResult<[f64; 4]> {
    let parts: Vec<&str> = text.split(',').collect();
    let error = || RenderError::config("bbox should contain 4 comma separated doubles").with_param("bbox", text);
    if parts.len() != 4 {
        return Err(error());
    }
    let mut out = [0.0; 4];
    for (slot, part) in out.iter_mut().zip(&parts) {
        *slot = part.trim().parse().map_err(|_| error())?;
    }
    Ok(out)
}

impl ProjectionSettings {
    pub fn init(mut cfg: ConfigObject, gazetteer: &dyn Gazetteer) -> RenderResult<Self> {
        cfg.take_value("qid");

        let mut settings = Self {
            crs: cfg
                .take_string("crs")?
                .map(|s| s.parse::<CrsSpec>())
                .transpose()
                .map_err(|e| RenderError::from(e).trace("Invalid projection crs"))?,
            bboxcrs: cfg
                .take_string("bboxcrs")?
                .map(|s| CrsCode::parse(&s))
                .transpose()
                .map_err(|e| RenderError::from(e).trace("Invalid projection bboxcrs"))?,
            xsize: take_size(&mut cfg, "xsize")?,
            ysize: take_size(&mut cfg, "ysize")?,
            x1: cfg.take_f64("x1")?,
            y1: cfg.take_f64("y1")?,
            x2: cfg.take_f64("x2")?,
            y2: cfg.take_f64("y2")?,
            cx: cfg.take_f64("cx")?,
            cy: cfg.take_f64("cy")?,
            resolution: cfg.take_f64("resolution")?,
            size: cfg.take_f64("size")?,
            ..Default::default()
        };

        if let Some(size) = settings.size {
            if size <= 0.0 {
                return Err(RenderError::config("Projection size multiplier must be positive").with_param("size", size));
            }
        }
        if let Some(resolution) = settings.resolution {
            if resolution <= 0.0 {
                return Err(RenderError::config("Projection resolution must be positive")
                    .with_param("resolution", resolution));
            }
        }

        if let Some(text) = cfg.take_string("bbox")? {
            settings.bbox = Some(parse_bbox(&text)?);
        }

        if let Some(place) = cfg.take_string("place")? {
            let location = gazetteer.name_search(&place).ok_or_else(|| {
                RenderError::config("Unable to find coordinates for location").with_param("place", &place)
            })?;
            settings.place = Some((location.longitude, location.latitude));
        }

        cfg.finish("Projection")?;
        Ok(settings)
    }
}

/// Effective projection of a layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    pub crs: Option<CrsSpec>,
    pub bboxcrs: Option<CrsCode>,
    pub xsize: Option<u32>,
    pub ysize: Option<u32>,
    pub x1: Option<f64>,
    pub y1: Option<f64>,
    pub x2: Option<f64>,
    pub y2: Option<f64>,
    pub cx: Option<f64>,
    pub cy: Option<f64>,
    pub resolution: Option<f64>,
    pub size: Option<f64>,
    /// `cx`,`cy` are lon/lat rather than `bboxcrs` coordinates
    pub latlon_center: bool,
}

impl Projection {
    /// Overlay settings read from a child configuration.
    pub fn merge(&self, settings: &ProjectionSettings) -> Projection {
        let mut p = self.clone();
        if settings.crs.is_some() {
            p.crs = settings.crs;
        }
        if settings.bboxcrs.is_some() {
            p.bboxcrs = settings.bboxcrs;
        }
        macro_rules! overlay {
            ($($field:ident),*) => {
                $(if settings.$field.is_some() { p.$field = settings.$field; })*
            };
        }
        overlay!(xsize, ysize, x1, y1, x2, y2, resolution, size);

        if settings.cx.is_some() || settings.cy.is_some() {
            p.cx = settings.cx.or(p.cx);
            p.cy = settings.cy.or(p.cy);
            p.latlon_center = false;
        }
        if let Some((lon, lat)) = settings.place {
            p.cx = Some(lon);
            p.cy = Some(lat);
            p.latlon_center = true;
        }

        if let Some([a, b, c, d]) = settings.bbox {
            // Geographic boxes are given in lat/lon order
            let geographic = p
                .bboxcrs
                .or_else(|| p.crs.and_then(|c| c.code()))
                .is_some_and(|c| c.is_geographic());
            let (x1, y1, x2, y2) = if geographic { (b, a, d, c) } else { (a, b, c, d) };
            p.x1 = Some(x1);
            p.y1 = Some(y1);
            p.x2 = Some(x2);
            p.y2 = Some(y2);
        }
        p
    }

    pub fn is_data(&self) -> bool {
        self.crs.is_some_and(|c| c.is_data())
    }

    pub fn crs_code(&self) -> RenderResult<CrsCode> {
        match self.crs {
            None => Err(RenderError::config("CRS not set")),
            Some(CrsSpec::Data) => Err(RenderError::config("The data projection has not been resolved")),
            Some(CrsSpec::Code(code)) => Ok(code),
        }
    }

    fn has_rect_settings(&self) -> bool {
        self.x1.is_some() || self.y1.is_some() || self.x2.is_some() || self.y2.is_some()
    }

    fn has_center_settings(&self) -> bool {
        self.cx.is_some() || self.cy.is_some() || self.resolution.is_some()
    }

    /// Adopt the CRS, area and size of a data grid for `crs: "data"`.
    pub fn update(&mut self, grid: &GridData) {
        if !self.is_data() {
            return;
        }
        self.crs = Some(CrsSpec::Code(grid.crs));

        if !self.has_rect_settings() && !self.has_center_settings() && self.bboxcrs.is_none() {
            self.x1 = Some(grid.bbox.min_x);
            self.y1 = Some(grid.bbox.min_y);
            self.x2 = Some(grid.bbox.max_x);
            self.y2 = Some(grid.bbox.max_y);
        }

        if let Some(size) = self.size {
            self.xsize = Some(((grid.width as f64 * size).round() as u32).max(2));
            self.ysize = Some(((grid.height as f64 * size).round() as u32).max(2));
        } else if self.xsize.is_none() && self.ysize.is_none() {
            self.xsize = Some(grid.width as u32);
            self.ysize = Some(grid.height as u32);
        }
    }

    /// The resolved world box, image size and resolution in km per pixel.
    fn prepare(&self) -> RenderResult<(PixelBox, f64)> {
        let crs = self.crs_code()?;

        if self.xsize.is_none() && self.ysize.is_none() {
            return Err(RenderError::config("CRS xsize and ysize are both missing"));
        }

        let rect = [self.x1, self.y1, self.x2, self.y2];
        let rect_count = rect.iter().filter(|v| v.is_some()).count();
        if rect_count > 0 && rect_count < 4 {
            return Err(RenderError::config("Partial CRS bounding box given: x1,y1,x2,y2 are needed"));
        }
        let center = [self.cx, self.cy, self.resolution];
        let center_count = center.iter().filter(|v| v.is_some()).count();
        if center_count > 0 && center_count < 3 {
            return Err(RenderError::config("Partial CRS center settings given: cx,cy,resolution are needed"));
        }

        if let [Some(x1), Some(y1), Some(x2), Some(y2)] = rect {
            return self.prepare_rect(crs, (x1, y1, x2, y2));
        }
        if let [Some(cx), Some(cy), Some(resolution)] = center {
            return self.prepare_center(crs, (cx, cy), resolution);
        }
        Err(RenderError::config("CRS bounding box missing"))
    }

    fn prepare_rect(&self, crs: CrsCode, (x1, y1, x2, y2): (f64, f64, f64, f64)) -> RenderResult<(PixelBox, f64)> {
        let transformation = CoordinateTransformation::new(self.bboxcrs.unwrap_or(crs), crs);
        let (xa, ya) = transformation.transform_checked(x1, y1)?;
        let (xb, yb) = transformation.transform_checked(x2, y2)?;
        if xa == xb || ya == yb {
            return Err(RenderError::config("Bounding box size is zero")
                .with_param("bbox", format!("{},{},{},{}", x1, y1, x2, y2)));
        }
        let world = BoundingBox::new(xa.min(xb), ya.min(yb), xa.max(xb), ya.max(yb));

        let aspect = world.height() / world.width();
        let (xsize, ysize) = match (self.xsize, self.ysize) {
            (Some(w), Some(h)) => (w, h),
            (Some(w), None) => (w, (w as f64 * aspect).round() as u32),
            (None, Some(h)) => ((h as f64 / aspect).round() as u32, h),
            (None, None) => return Err(RenderError::config("CRS xsize and ysize are both missing")),
        };
        if xsize < 2 || ysize < 2 {
            return Err(RenderError::config("Image size must be at least 2x2")
                .with_param("xsize", xsize)
                .with_param("ysize", ysize));
        }

        let resolution = if crs.is_geographic() {
            world.height() * 2.0 * PI * EARTH_RADIUS_KM / (360.0 * ysize as f64)
        } else {
            world.width() / (xsize as f64 * 1000.0)
        };
        Ok((PixelBox::new(world, xsize, ysize), resolution))
    }

    fn prepare_center(&self, crs: CrsCode, (cx, cy): (f64, f64), resolution: f64) -> RenderResult<(PixelBox, f64)> {
        let (xsize, ysize) = match (self.xsize, self.ysize) {
            (Some(w), Some(h)) => (w, h),
            _ => {
                return Err(RenderError::config(
                    "Both xsize and ysize are required when cx,cy,resolution are given",
                ))
            }
        };

        let source = if self.latlon_center {
            CrsCode::Epsg4326
        } else {
            self.bboxcrs.unwrap_or(crs)
        };
        let (x, y) = CoordinateTransformation::new(source, crs).transform_checked(cx, cy)?;

        let (half_w, half_h) = if crs.is_geographic() {
            let circumference = 2.0 * PI * EARTH_RADIUS_KM;
            let dy = 360.0 * ysize as f64 / 2.0 * resolution / circumference;
            let dx = 360.0 * xsize as f64 / 2.0 * resolution / circumference / y.to_radians().cos();
            (dx, dy)
        } else {
            (
                xsize as f64 / 2.0 * resolution * 1000.0,
                ysize as f64 / 2.0 * resolution * 1000.0,
            )
        };
        let world = BoundingBox::new(x - half_w, y - half_h, x + half_w, y + half_h);
        Ok((PixelBox::new(world, xsize, ysize), resolution))
    }

    pub fn pixel_box(&self) -> RenderResult<PixelBox> {
        self.prepare().map(|(pbox, _)| pbox)
    }

    /// Resolution in km per pixel.
    pub fn resolution(&self) -> RenderResult<f64> {
        self.prepare().map(|(_, res)| res)
    }

    /// Image size once the box is resolved.
    pub fn image_size(&self) -> Option<(u32, u32)> {
        self.pixel_box().ok().map(|pbox| (pbox.width, pbox.height))
    }

    pub fn hash_value(&self) -> u64 {
        let mut seed = hash_value(&self.crs.map(|c| c.to_string()));
        hash_combine(&mut seed, hash_value(&self.bboxcrs.map(|c| c.to_string())));
        hash_combine(&mut seed, hash_value(&self.xsize));
        hash_combine(&mut seed, hash_value(&self.ysize));
        for v in [
            self.x1,
            self.y1,
            self.x2,
            self.y2,
            self.cx,
            self.cy,
            self.resolution,
            self.size,
        ] {
            hash_combine(&mut seed, v.map_or(0, hash_f64));
        }
        hash_combine(&mut seed, self.latlon_center as u64);
        seed
    }
}
