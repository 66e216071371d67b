/// A sampler the server understands, with the numeric tag hosts persist as
/// selection state. Tags are shared with the other backends' tables, so an
/// existing tag is never renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sampler {
    pub id: &'static str,
    pub tag: u32,
}

pub const DEFAULT_SAMPLER: &str = "LMS";

const SAMPLERS: [Sampler; 16] = [
    Sampler { id: "Euler", tag: 10 },
    Sampler { id: "Euler a", tag: 20 },
    Sampler { id: "Heun", tag: 30 },
    Sampler { id: "DPM2", tag: 40 },
    Sampler { id: "DPM2 a", tag: 50 },
    Sampler { id: "LMS", tag: 60 },
    Sampler { id: "DPM fast", tag: 70 },
    Sampler { id: "DPM adaptive", tag: 80 },
    Sampler { id: "DPM++ 2S a Karras", tag: 90 },
    Sampler { id: "DPM++ 2M Karras", tag: 100 },
    Sampler { id: "DPM++ SDE Karras", tag: 105 },
    Sampler { id: "DPM++ 2S a", tag: 110 },
    Sampler { id: "DPM++ 2M", tag: 120 },
    Sampler { id: "DPM++ SDE", tag: 125 },
    Sampler { id: "PLMS", tag: 200 },
    Sampler { id: "DDIM", tag: 210 },
];

pub fn samplers() -> &'static [Sampler] {
    &SAMPLERS
}

pub fn sampler_by_id(id: &str) -> Option<Sampler> {
    SAMPLERS.iter().copied().find(|sampler| sampler.id == id)
}

pub fn sampler_by_tag(tag: u32) -> Option<Sampler> {
    SAMPLERS.iter().copied().find(|sampler| sampler.tag == tag)
}
