use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::{json, Value};

use crate::encoding::encode_base64;
use crate::error::BackendError;
use crate::params::GenerationParams;
use crate::tempfiles::TempFileAllocator;

/// Image source for one ControlNet unit, usually a render pass the host
/// writes out on demand.
pub trait ConditioningImage {
    fn name(&self) -> &str;
    fn save_render(&self, path: &Path) -> anyhow::Result<()>;
}

/// Conditioning image backed by a file; re-encoded as PNG when saved.
#[derive(Debug, Clone)]
pub struct FileConditioningImage {
    name: String,
    source: PathBuf,
}

impl FileConditioningImage {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        let source = source.into();
        let name = source
            .file_stem()
            .and_then(|value| value.to_str())
            .filter(|value| !value.is_empty())
            .unwrap_or("controlnet")
            .to_string();
        Self { name, source }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

impl ConditioningImage for FileConditioningImage {
    fn name(&self) -> &str {
        &self.name
    }

    fn save_render(&self, path: &Path) -> anyhow::Result<()> {
        let image = image::open(&self.source)
            .with_context(|| format!("failed to open {}", self.source.display()))?;
        image
            .save_with_format(path, image::ImageFormat::Png)
            .with_context(|| format!("failed to save {}", path.display()))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlMode {
    #[default]
    Balanced,
    PromptImportant,
    ControlNetImportant,
}

impl ControlMode {
    pub fn as_index(self) -> u8 {
        match self {
            ControlMode::Balanced => 0,
            ControlMode::PromptImportant => 1,
            ControlMode::ControlNetImportant => 2,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "0" | "balanced" => Some(ControlMode::Balanced),
            "1" | "prompt" | "my prompt is more important" => Some(ControlMode::PromptImportant),
            "2" | "controlnet" | "controlnet is more important" => {
                Some(ControlMode::ControlNetImportant)
            }
            _ => None,
        }
    }
}

pub struct ControlNetUnit {
    pub image: Box<dyn ConditioningImage>,
    pub weight: f64,
    pub preprocessor: String,
    pub model: String,
    pub lowvram: bool,
    pub preprocessor_res: u32,
    pub threshold_a: f64,
    pub threshold_b: f64,
    pub guidance_start: f64,
    pub guidance_end: f64,
    pub control_mode: ControlMode,
    pub pixel_perfect: bool,
}

impl ControlNetUnit {
    /// Unit with the extension's own defaults.
    pub fn new(
        image: Box<dyn ConditioningImage>,
        preprocessor: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            image,
            weight: 1.0,
            preprocessor: preprocessor.into(),
            model: model.into(),
            lowvram: false,
            preprocessor_res: 512,
            threshold_a: 64.0,
            threshold_b: 64.0,
            guidance_start: 0.0,
            guidance_end: 1.0,
            control_mode: ControlMode::Balanced,
            pixel_perfect: false,
        }
    }

    fn to_arg(&self, input_image: String) -> Value {
        json!({
            "input_image": input_image,
            "weight": self.weight,
            "module": self.preprocessor,
            "model": self.model,
            "lowvram": self.lowvram,
            "processor_res": self.preprocessor_res,
            "threshold_a": self.threshold_a,
            "threshold_b": self.threshold_b,
            "guidance_start": self.guidance_start,
            "guidance_end": self.guidance_end,
            "control_mode": self.control_mode.as_index(),
            "pixel_perfect": self.pixel_perfect,
        })
    }
}

/// Renders and encodes every unit in order. The first failing unit aborts
/// the whole list.
pub fn build_controlnet_args(
    units: &[ControlNetUnit],
    temp_files: &dyn TempFileAllocator,
) -> Result<Vec<Value>, BackendError> {
    let mut args = Vec::with_capacity(units.len());
    for unit in units {
        let path = temp_files
            .allocate(&format!("{}-", unit.image.name()))
            .map_err(BackendError::TempFile)?;
        unit.image.save_render(&path).map_err(|err| {
            log::warn!("couldn't save segmentation image {}: {err:#}", unit.image.name());
            BackendError::SaveSegmentationImage(format!("{err:#}"))
        })?;
        let bytes = fs::read(&path).map_err(|err| {
            BackendError::SaveSegmentationImage(format!("failed reading {}: {err}", path.display()))
        })?;
        args.push(unit.to_arg(encode_base64(&bytes)));
    }
    Ok(args)
}

pub fn attach_controlnet_args(params: &mut GenerationParams, args: Vec<Value>) {
    params.insert(
        "alwayson_scripts".to_string(),
        json!({
            "controlnet": {
                "args": args,
            }
        }),
    );
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::Cell;
    use std::path::Path;
    use std::rc::Rc;

    use airender_contracts::errors::ErrorCode;
    use anyhow::bail;
    use image::{Rgb, RgbImage};
    use serde_json::json;

    use super::*;
    use crate::tempfiles::TempDirAllocator;

    /// Writes fixed bytes, or fails when told to.
    pub(crate) struct StubImage {
        pub name: String,
        pub bytes: Vec<u8>,
        pub fail: bool,
        saves: Rc<Cell<u32>>,
    }

    impl StubImage {
        pub(crate) fn ok(name: &str, bytes: &[u8]) -> Box<Self> {
            Box::new(Self {
                name: name.to_string(),
                bytes: bytes.to_vec(),
                fail: false,
                saves: Rc::default(),
            })
        }

        pub(crate) fn failing(name: &str) -> Box<Self> {
            Box::new(Self {
                name: name.to_string(),
                bytes: Vec::new(),
                fail: true,
                saves: Rc::default(),
            })
        }

        /// Shared save counter that outlives the boxed stub.
        pub(crate) fn save_counter(&self) -> Rc<Cell<u32>> {
            Rc::clone(&self.saves)
        }
    }

    impl ConditioningImage for StubImage {
        fn name(&self) -> &str {
            &self.name
        }

        fn save_render(&self, path: &Path) -> anyhow::Result<()> {
            self.saves.set(self.saves.get() + 1);
            if self.fail {
                bail!("render layer {} is empty", self.name);
            }
            std::fs::write(path, &self.bytes)?;
            Ok(())
        }
    }

    #[test]
    fn builds_one_entry_per_unit_in_order() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let allocator = TempDirAllocator::new(temp.path());
        let mut depth = ControlNetUnit::new(StubImage::ok("depth", b"D"), "depth_midas", "control_depth");
        depth.weight = 0.75;
        depth.control_mode = ControlMode::ControlNetImportant;
        let pose = ControlNetUnit::new(StubImage::ok("pose", b"P"), "openpose", "control_openpose");
        let edges = ControlNetUnit::new(StubImage::ok("edges", b"E"), "canny", "control_canny");

        let args = build_controlnet_args(&[depth, pose, edges], &allocator)?;

        assert_eq!(args.len(), 3);
        let modules: Vec<&str> = args
            .iter()
            .filter_map(|arg| arg["module"].as_str())
            .collect();
        assert_eq!(modules, vec!["depth_midas", "openpose", "canny"]);
        assert_eq!(args[0]["input_image"], json!("RA=="));
        assert_eq!(args[0]["weight"], json!(0.75));
        assert_eq!(args[0]["control_mode"], json!(2));
        assert_eq!(args[1]["input_image"], json!("UA=="));
        assert_eq!(args[2]["model"], json!("control_canny"));
        assert_eq!(args[2]["processor_res"], json!(512));
        assert_eq!(args[2]["guidance_end"], json!(1.0));
        assert_eq!(args[2]["pixel_perfect"], json!(false));
        Ok(())
    }

    #[test]
    fn failing_unit_aborts_the_whole_list() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let allocator = TempDirAllocator::new(temp.path());
        let stubs = [
            StubImage::ok("a", b"A"),
            StubImage::failing("b"),
            StubImage::ok("c", b"C"),
        ];
        let counters: Vec<Rc<Cell<u32>>> = stubs.iter().map(|stub| stub.save_counter()).collect();
        let units: Vec<ControlNetUnit> = stubs
            .into_iter()
            .map(|stub| ControlNetUnit::new(stub, "depth", "m"))
            .collect();

        let err = build_controlnet_args(&units, &allocator)
            .err()
            .ok_or_else(|| anyhow::anyhow!("expected failure"))?;
        assert_eq!(err.code(), Some(ErrorCode::SaveSegmentationImage));
        let saves: Vec<u32> = counters.iter().map(|counter| counter.get()).collect();
        assert_eq!(saves, vec![1, 1, 0]);
        Ok(())
    }

    #[test]
    fn attach_nests_args_under_alwayson_scripts() {
        let mut params = GenerationParams::new();
        attach_controlnet_args(&mut params, vec![json!({"module": "canny"})]);
        assert_eq!(
            params["alwayson_scripts"]["controlnet"]["args"][0]["module"],
            json!("canny")
        );
    }

    #[test]
    fn file_image_is_reencoded_as_png() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let source = temp.path().join("Depth Pass.bmp");
        RgbImage::from_pixel(4, 3, Rgb([10, 20, 30])).save(&source)?;
        let image = FileConditioningImage::new(&source);
        assert_eq!(image.name(), "Depth Pass");

        let target = temp.path().join("out.png");
        image.save_render(&target)?;
        let bytes = std::fs::read(&target)?;
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
        assert_eq!(image::open(&target)?.width(), 4);
        Ok(())
    }

    #[test]
    fn control_mode_parses_labels_and_indexes() {
        assert_eq!(ControlMode::parse("balanced"), Some(ControlMode::Balanced));
        assert_eq!(
            ControlMode::parse("My prompt is more important"),
            Some(ControlMode::PromptImportant)
        );
        assert_eq!(ControlMode::parse("2"), Some(ControlMode::ControlNetImportant));
        assert_eq!(ControlMode::parse("loud"), None);
    }
}
