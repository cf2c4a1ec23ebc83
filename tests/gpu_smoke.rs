//! Renders a few primitives into offscreen targets on whatever adapter the
//! machine offers. Machines without one skip these tests.

use viewport_render::prelude::*;

const SIZE: u32 = 64;

fn session() -> Option<Rc<DeviceSession>> {
    let _ = env_logger::builder().is_test(true).try_init();
    match DeviceSession::request_headless(RendererConfig::default()) {
        Ok(session) => Some(session),
        Err(e) => {
            log::warn!("skipping GPU test: {e}");
            eprintln!("skipping GPU test: {e}");
            None
        }
    }
}

fn renderer(session: &Rc<DeviceSession>) -> ViewportSceneRenderer {
    let context = session.group().create_context();
    let mut renderer = ViewportSceneRenderer::new(session.clone(), context);
    let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
    renderer.set_view_projection(ProjParams::perspective(view, 0.8, 1.0, 0.1, 100.0));
    renderer
}

fn pixel(pixels: &[u8], x: u32, y: u32) -> [u8; 4] {
    let offset = ((y * SIZE + x) * 4) as usize;
    [pixels[offset], pixels[offset + 1], pixels[offset + 2], pixels[offset + 3]]
}

#[test]
fn flat_particle_covers_the_center() {
    let Some(session) = session() else { return };
    let mut renderer = renderer(&session);
    let particles = renderer
        .create_particle_primitive(ShadingMode::Flat, RenderingQuality::High, ParticleShape::Spherical, false)
        .unwrap();
    {
        let mut p = particles.borrow_mut();
        p.set_size(1).unwrap();
        p.set_positions(&[Vec3::ZERO]).unwrap();
        p.set_radius(1.0).unwrap();
        p.set_color(color::RED).unwrap();
    }

    let target = OffscreenTarget::new(&session, SIZE, SIZE, wgpu::TextureFormat::Rgba8Unorm).unwrap();
    renderer.begin_frame(target.frame_target(), Viewport::new(SIZE, SIZE)).unwrap();
    renderer.render_frame(|r| particles.borrow_mut().render(r)).unwrap();
    renderer.end_frame().unwrap();

    let pixels = target.read_pixels(&session).unwrap();
    let center = pixel(&pixels, SIZE / 2, SIZE / 2);
    assert!(center[0] > 200 && center[1] < 50, "center pixel {center:?}");
    assert_eq!(pixel(&pixels, 0, 0), [0, 0, 0, 255]);
}

#[test]
fn picking_resolves_particles_to_their_owner() {
    let Some(session) = session() else { return };
    let mut renderer = renderer(&session);
    let particles = renderer
        .create_particle_primitive(ShadingMode::Normal, RenderingQuality::High, ParticleShape::Spherical, false)
        .unwrap();
    {
        let mut p = particles.borrow_mut();
        p.set_size(2).unwrap();
        p.set_positions(&[Vec3::new(-10.0, 0.0, 0.0), Vec3::ZERO]).unwrap();
        p.set_radius(1.0).unwrap();
    }

    let target = OffscreenTarget::picking(&session, SIZE, SIZE).unwrap();
    renderer.begin_frame(target.frame_target(), Viewport::new(SIZE, SIZE)).unwrap();
    renderer
        .render_frame(|r| {
            r.begin_pick_object(42);
            let result = particles.borrow_mut().render(r);
            r.end_pick_object();
            result
        })
        .unwrap();
    renderer.end_frame().unwrap();

    let id = target.pick_at(&session, SIZE / 2, SIZE / 2).unwrap();
    let hit = renderer.object_at(id);
    assert_eq!(hit, Some(PickHit { owner: Some(42), sub_object: 1 }));
    assert_eq!(target.pick_at(&session, 0, 0).unwrap(), 0);
}

#[test]
fn arrows_lines_and_meshes_render_without_errors() {
    let Some(session) = session() else { return };
    let mut renderer = renderer(&session);

    let arrows = renderer
        .create_arrow_primitive(ArrowShape::Arrow, ShadingMode::Normal, RenderingQuality::High)
        .unwrap();
    {
        let mut a = arrows.borrow_mut();
        let mut elements = a.start_set_elements(2).unwrap();
        elements.set_element(0, Vec3::ZERO, Vec3::X, color::RED, 0.2);
        elements.set_element(1, Vec3::ZERO, Vec3::Y, Color::new(0.0, 0.0, 1.0, 0.5), 0.2);
        elements.end_set_elements();
    }

    let lines = renderer.create_line_primitive().unwrap();
    {
        let mut l = lines.borrow_mut();
        l.set_vertex_count(4, 3.0).unwrap();
        l.set_vertex_positions(&[Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::Z]).unwrap();
        l.set_line_color(color::WHITE).unwrap();
    }

    let mesh = renderer.create_mesh_primitive().unwrap();
    mesh.borrow_mut()
        .set_mesh(
            &TriMesh::new(
                vec![Vec3::ZERO, Vec3::X, Vec3::Y],
                vec![TriFace::new(0, 1, 2)],
            ),
            color::GREEN,
        )
        .unwrap();

    let target = OffscreenTarget::new(&session, SIZE, SIZE, wgpu::TextureFormat::Rgba8Unorm).unwrap();
    renderer.begin_frame(target.frame_target(), Viewport::new(SIZE, SIZE)).unwrap();
    renderer
        .render_frame(|r| {
            arrows.borrow_mut().render(r)?;
            lines.borrow_mut().render(r)?;
            mesh.borrow_mut().render(r)
        })
        .unwrap();
    renderer.end_frame().unwrap();

    let pixels = target.read_pixels(&session).unwrap();
    assert!(pixels.chunks_exact(4).any(|p| p[..3] != [0, 0, 0]));
}

/// Logs every render call with the pass it happened in and the world
/// transform in effect, deferring itself whenever the renderer allows.
struct Recorder {
    self_ref: std::rc::Weak<RefCell<Recorder>>,
    calls: Rc<RefCell<Vec<(bool, Mat4)>>>,
}

impl Recorder {
    fn create(calls: &Rc<RefCell<Vec<(bool, Mat4)>>>) -> Rc<RefCell<Recorder>> {
        Rc::new_cyclic(|self_ref| {
            RefCell::new(Recorder {
                self_ref: self_ref.clone(),
                calls: calls.clone(),
            })
        })
    }
}

impl Primitive for Recorder {
    fn is_valid(&self, _: &ViewportSceneRenderer) -> bool {
        true
    }

    fn render(&mut self, renderer: &mut ViewportSceneRenderer) -> Result<()> {
        self.calls
            .borrow_mut()
            .push((renderer.is_translucent_pass(), renderer.world_transform()));
        let primitive: std::rc::Weak<RefCell<dyn Primitive>> = self.self_ref.clone();
        renderer.defer_translucent(primitive);
        Ok(())
    }

    fn element_count(&self) -> usize {
        1
    }
}

#[test]
fn translucent_primitives_are_drawn_in_a_second_pass() {
    let Some(session) = session() else { return };
    let mut renderer = renderer(&session);
    let kept_calls = Rc::new(RefCell::new(Vec::new()));
    let dropped_calls = Rc::new(RefCell::new(Vec::new()));
    let kept = Recorder::create(&kept_calls);
    let shifted = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));

    let target = OffscreenTarget::new(&session, SIZE, SIZE, wgpu::TextureFormat::Rgba8Unorm).unwrap();
    renderer.begin_frame(target.frame_target(), Viewport::new(SIZE, SIZE)).unwrap();
    renderer
        .render_frame(|r| {
            r.set_world_transform(shifted);
            kept.borrow_mut().render(r)?;

            let dropped = Recorder::create(&dropped_calls);
            r.set_world_transform(Mat4::IDENTITY);
            dropped.borrow_mut().render(r)?;
            drop(dropped);

            assert_eq!(r.pending_translucent_count(), 2);
            assert!(!r.is_translucent_pass());
            Ok(())
        })
        .unwrap();

    assert_eq!(renderer.pending_translucent_count(), 0);
    assert!(!renderer.is_translucent_pass());
    assert_eq!(renderer.world_transform(), Mat4::IDENTITY);
    renderer.end_frame().unwrap();

    // Queued in the main pass, then drawn once more under the transform
    // captured when it was deferred.
    assert_eq!(*kept_calls.borrow(), vec![(false, shifted), (true, shifted)]);
    // Gone before the second pass, so only the main pass saw it.
    assert_eq!(*dropped_calls.borrow(), vec![(false, Mat4::IDENTITY)]);
}

#[test]
fn arrow_chunks_written_out_of_order_all_reach_the_gpu() {
    let _ = env_logger::builder().is_test(true).try_init();
    // Two 52-byte flat cylinders of four corners each per chunk.
    let config = RendererConfig {
        max_arrow_buffer_bytes: 2 * 4 * std::mem::size_of::<viewport_render::renderer::arrow::FlatVertex>(),
        ..Default::default()
    };
    let session = match DeviceSession::request_headless(config) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("skipping GPU test: {e}");
            return;
        }
    };
    let mut renderer = renderer(&session);
    let arrows = renderer
        .create_arrow_primitive(ArrowShape::Cylinder, ShadingMode::Flat, RenderingQuality::High)
        .unwrap();

    let colors = [
        color::RED,
        color::GREEN,
        Color::new(0.0, 0.0, 1.0, 1.0),
        color::WHITE,
        Color::new(1.0, 1.0, 0.0, 1.0),
    ];
    let xs = [-1.6, -0.8, 0.0, 0.8, 1.6];
    let base = |i: usize| Vec3::new(xs[i], -0.5, 0.0);
    {
        let mut a = arrows.borrow_mut();
        let mut elements = a.start_set_elements(5).unwrap();
        // The last chunk is only touched by the final write, so only the
        // drop uploads it.
        for i in [1, 3, 0, 2, 4] {
            elements.set_element(i, base(i), Vec3::Y, colors[i], 0.25);
        }
        drop(elements);

        assert_eq!(a.technique(), ArrowTechnique::Flat);
        assert_eq!(a.chunk_layout().chunk_count(), 3);
        assert_eq!(a.chunk_layout().chunk_len(2), 1);
        for chunk in 0..3 {
            let vertices: &[viewport_render::renderer::arrow::FlatVertex] =
                bytemuck::cast_slice(a.chunk_bytes(chunk).unwrap());
            assert_eq!(vertices.len(), a.chunk_layout().chunk_len(chunk) * 4);
            for (offset, corners) in vertices.chunks_exact(4).enumerate() {
                let index = a.chunk_layout().chunk_start(chunk) + offset;
                for corner in corners {
                    assert_eq!(corner.base, <[f32; 3]>::from(base(index)), "element {index}");
                    assert_eq!(corner.color, color::to_array(colors[index]), "element {index}");
                }
            }
        }
        assert!(a.chunk_bytes(3).is_none());
    }

    let target = OffscreenTarget::new(&session, SIZE, SIZE, wgpu::TextureFormat::Rgba8Unorm).unwrap();
    renderer.begin_frame(target.frame_target(), Viewport::new(SIZE, SIZE)).unwrap();
    renderer.render_frame(|r| arrows.borrow_mut().render(r)).unwrap();
    renderer.end_frame().unwrap();

    // Half the visible height at the focal plane, five units away.
    let half_extent = 5.0 * (0.4f32).tan();
    let pixels = target.read_pixels(&session).unwrap();
    for (i, x) in xs.iter().enumerate() {
        let column = (((x / half_extent) + 1.0) * 0.5 * SIZE as f32) as u32;
        let seen = pixel(&pixels, column.min(SIZE - 1), SIZE / 2);
        let expected = color::to_array(colors[i]).map(|c| (c * 255.0) as i32);
        for channel in 0..3 {
            assert!(
                (seen[channel] as i32 - expected[channel]).abs() < 40,
                "element {i}: pixel {seen:?}, expected {expected:?}"
            );
        }
    }
}
