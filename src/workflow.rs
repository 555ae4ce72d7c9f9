// Workflows we know how to build.
//
// The card workflow is a FLUX schnell txt2img graph: few steps, cfg 1, portrait
// latent. Parameters that vary per run live in CardRequest; the model files come
// from config.

use std::path::Path;

use anyhow::{Context, Result};
use rand::Rng;

use crate::{
    config::ModelConfig,
    graph::{ComputationGraph, Flow},
};

pub const CARD_PROMPT: &str = "A beautiful literary trading card design for Ernest Hemingway, vintage 1920s Paris aesthetic, \
art deco borders in gold and navy blue, aged paper texture background, elegant typography, \
fishing rod and marlin silhouette, typewriter keys subtly integrated into the design, \
\"The Sun Also Rises\" and \"Old Man and the Sea\" as book spines on the side, \
Nobel Prize medal icon, connections lines showing literary influence network, \
dark blue and gold color palette, sophisticated literary collectible card design, \
high detail, professional graphic design";

pub const CARD_NEGATIVE: &str = "blurry, low quality, modern, digital, neon colors, ugly, deformed";

#[derive(Clone, Debug, PartialEq)]
pub struct CardRequest {
    pub prompt: String,
    pub negative_prompt: String,
    pub seed: u64,
    pub steps: u32,
    pub cfg: f64,
    pub sampler_name: String,
    pub scheduler: String,
    pub denoise: f64,
    pub width: u32,
    pub height: u32,
    pub batch_size: u32,
    pub filename_prefix: String,
}

impl Default for CardRequest {
    fn default() -> Self {
        Self {
            prompt: CARD_PROMPT.to_string(),
            negative_prompt: CARD_NEGATIVE.to_string(),
            seed: random_seed(),
            steps: 4,
            cfg: 1.0,
            sampler_name: "euler".to_string(),
            scheduler: "normal".to_string(),
            denoise: 1.0,
            // Portrait, roughly trading-card proportions.
            width: 1024,
            height: 1536,
            batch_size: 1,
            filename_prefix: "hemingway_card".to_string(),
        }
    }
}

/// A fresh seed in 1..=2^32.
pub fn random_seed() -> u64 {
    rand::thread_rng().gen_range(1..=1u64 << 32)
}

impl CardRequest {
    pub fn build(&self, models: &ModelConfig) -> ComputationGraph {
        let mut flow = Flow::new();
        let unet = flow
            .node("UNETLoader")
            .input("unet_name", models.unet_name.as_str())
            .add();
        let clip = flow
            .node("DualCLIPLoader")
            .input("clip_name1", models.clip_name1.as_str())
            .input("clip_name2", models.clip_name2.as_str())
            .input("type", models.clip_type.as_str())
            .add();
        let vae = flow
            .node("VAELoader")
            .input("vae_name", models.vae_name.as_str())
            .add();
        let positive = flow
            .node("CLIPTextEncode")
            .input("text", self.prompt.as_str())
            .input("clip", clip.output(0))
            .add();
        let negative = flow
            .node("CLIPTextEncode")
            .input("text", self.negative_prompt.as_str())
            .input("clip", clip.output(0))
            .add();
        let latent = flow
            .node("EmptyLatentImage")
            .input("width", self.width)
            .input("height", self.height)
            .input("batch_size", self.batch_size)
            .add();
        let sampler = flow
            .node("KSampler")
            .input("seed", self.seed)
            .input("steps", self.steps)
            .input("cfg", self.cfg)
            .input("sampler_name", self.sampler_name.as_str())
            .input("scheduler", self.scheduler.as_str())
            .input("denoise", self.denoise)
            .input("model", unet.output(0))
            .input("positive", positive.output(0))
            .input("negative", negative.output(0))
            .input("latent_image", latent.output(0))
            .add();
        let decoded = flow
            .node("VAEDecode")
            .input("samples", sampler.output(0))
            .input("vae", vae.output(0))
            .add();
        flow.node("SaveImage")
            .input("filename_prefix", self.filename_prefix.as_str())
            .input("images", decoded.output(0))
            .add();
        flow.build()
    }
}

/// Loads an API-format workflow ("Save (API)" in ComfyUI) from disk.
pub fn load_workflow(path: impl AsRef<Path>) -> Result<ComputationGraph> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read workflow {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse workflow {}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::graph::{Input, Literal, NodeOutput};

    fn find<'a>(graph: &'a ComputationGraph, class_type: &str) -> Vec<(&'a str, &'a crate::graph::Node)> {
        graph.nodes().filter(|(_, n)| n.class_type == class_type).collect()
    }

    #[test]
    fn test_card_graph_shape() {
        let request = CardRequest {
            seed: 1234,
            ..Default::default()
        };
        let graph = request.build(&ModelConfig::default());
        assert_eq!(graph.len(), 9);
        assert_eq!(graph.validate(), Ok(()));

        let (sampler_id, sampler) = find(&graph, "KSampler")[0];
        assert_eq!(sampler.inputs["seed"], Input::Literal(Literal::Integer(1234)));
        assert_eq!(sampler.inputs["steps"], Input::Literal(Literal::Integer(4)));
        assert_eq!(sampler.inputs["cfg"], Input::Literal(Literal::Float(1.0)));
        assert_eq!(sampler.dependencies().count(), 4);

        let (unet_id, unet) = find(&graph, "UNETLoader")[0];
        assert_eq!(unet.inputs["unet_name"], Input::from("flux1-schnell.safetensors"));
        assert_eq!(sampler.inputs["model"], Input::Reference(NodeOutput(unet_id.to_owned(), 0)));

        let (_, decode) = find(&graph, "VAEDecode")[0];
        assert_eq!(decode.inputs["samples"], Input::Reference(NodeOutput(sampler_id.to_owned(), 0)));

        let (_, save) = find(&graph, "SaveImage")[0];
        assert_eq!(save.inputs["filename_prefix"], Input::from("hemingway_card"));

        let encoders = find(&graph, "CLIPTextEncode");
        assert_eq!(encoders.len(), 2);
        let texts = encoders.iter().map(|(_, n)| n.inputs["text"].clone()).collect::<Vec<_>>();
        assert!(texts.contains(&Input::from(CARD_PROMPT)));
        assert!(texts.contains(&Input::from(CARD_NEGATIVE)));
    }

    #[test]
    fn test_card_request_overrides() {
        let request = CardRequest {
            prompt: "a lighthouse".to_string(),
            width: 768,
            height: 768,
            seed: 7,
            ..Default::default()
        };
        let models = ModelConfig {
            vae_name: "other_vae.safetensors".to_string(),
            ..Default::default()
        };
        let graph = request.build(&models);
        let (_, latent) = find(&graph, "EmptyLatentImage")[0];
        assert_eq!(latent.inputs["width"], Input::from(768u32));
        let (_, vae) = find(&graph, "VAELoader")[0];
        assert_eq!(vae.inputs["vae_name"], Input::from("other_vae.safetensors"));
    }

    #[test]
    fn test_card_keeps_full_width_seed() {
        let request = CardRequest {
            seed: u64::MAX,
            ..Default::default()
        };
        let graph = request.build(&ModelConfig::default());
        let (_, sampler) = find(&graph, "KSampler")[0];
        assert_eq!(sampler.inputs["seed"], Input::Literal(Literal::Unsigned(u64::MAX)));
        let body = serde_json::to_string(&graph).unwrap();
        assert!(body.contains("\"seed\":18446744073709551615"));
    }

    #[test]
    fn test_random_seed_range() {
        for _ in 0..100 {
            let seed = random_seed();
            assert!((1..=1u64 << 32).contains(&seed));
        }
    }

    #[test]
    fn test_load_workflow() {
        let graph = CardRequest::default().build(&ModelConfig::default());
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(serde_json::to_string_pretty(&graph).unwrap().as_bytes()).unwrap();
        assert_eq!(load_workflow(file.path()).unwrap(), graph);

        assert!(load_workflow("/nonexistent/workflow.json").is_err());
        let mut bad = tempfile::NamedTempFile::new().unwrap();
        bad.write_all(b"{\"1\": 5}").unwrap();
        assert!(load_workflow(bad.path()).is_err());
    }
}
