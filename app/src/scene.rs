//! Demo scene: an orbiting camera.

use redlilium_denoiser::{CommandBuffer, DenoiserResult, Extent2d, FrameRenderInfo, Scene};

/// Degrees the camera advances per frame.
const ORBIT_STEP: f32 = 1.5;

#[derive(Debug, Clone)]
pub struct DemoScene {
    angle: f32,
    aspect: f32,
}

impl DemoScene {
    pub fn new(extent: Extent2d) -> Self {
        Self {
            angle: 0.0,
            aspect: aspect(extent),
        }
    }

    pub fn angle(&self) -> f32 {
        self.angle
    }

    pub fn aspect(&self) -> f32 {
        self.aspect
    }
}

fn aspect(extent: Extent2d) -> f32 {
    if extent.height == 0 {
        1.0
    } else {
        extent.width as f32 / extent.height as f32
    }
}

impl Scene for DemoScene {
    fn update(&mut self, cmd: &mut CommandBuffer, info: &FrameRenderInfo) -> DenoiserResult<()> {
        self.angle = (self.angle + ORBIT_STEP) % 360.0;
        cmd.insert_label(&format!("scene update {:.1}deg", self.angle))?;
        log::trace!("Scene: frame {} camera at {:.1}deg", info.frame_number, self.angle);
        Ok(())
    }

    fn on_resized(&mut self, extent: Extent2d) {
        self.aspect = aspect(extent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aspect_follows_resize() {
        let mut scene = DemoScene::new(Extent2d::new(1280, 720));
        assert!((scene.aspect() - 16.0 / 9.0).abs() < 1e-6);

        scene.on_resized(Extent2d::new(512, 512));
        assert_eq!(scene.aspect(), 1.0);
        assert_eq!(scene.angle(), 0.0);
    }
}
