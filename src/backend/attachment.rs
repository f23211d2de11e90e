// Render pass attachment layout
//
// The render pass declares its attachments in ATTACHMENT_ORDER and every
// framebuffer lists its views in the same order. Both sides read the order
// from this module, so they cannot disagree.

use ash::vk;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    /// Single-sample swapchain image the multisample color resolves into
    ResolvedColor,
    MultisampleColor,
    Depth,
}

pub const ATTACHMENT_ORDER: [AttachmentKind; 3] = [
    AttachmentKind::ResolvedColor,
    AttachmentKind::MultisampleColor,
    AttachmentKind::Depth,
];

impl AttachmentKind {
    /// Attachment index in the render pass and framebuffer.
    pub fn index(self) -> u32 {
        ATTACHMENT_ORDER
            .iter()
            .position(|&kind| kind == self)
            .map_or(0, |i| i as u32)
    }

    /// Layout the attachment has while the subpass runs.
    pub fn subpass_layout(self) -> vk::ImageLayout {
        match self {
            AttachmentKind::ResolvedColor | AttachmentKind::MultisampleColor => {
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
            }
            AttachmentKind::Depth => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        }
    }

    pub fn reference(self) -> vk::AttachmentReference {
        vk::AttachmentReference {
            attachment: self.index(),
            layout: self.subpass_layout(),
        }
    }
}

/// Formats shared by the render pass and the swapchain's attachments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentFormats {
    pub color: vk::Format,
    pub depth: vk::Format,
    pub samples: vk::SampleCountFlags,
}

pub fn attachment_description(kind: AttachmentKind, formats: &AttachmentFormats) -> vk::AttachmentDescription {
    let description = vk::AttachmentDescription::default()
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED);

    match kind {
        AttachmentKind::ResolvedColor => description
            .format(formats.color)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::DONT_CARE)
            .store_op(vk::AttachmentStoreOp::STORE)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR),
        AttachmentKind::MultisampleColor => description
            .format(formats.color)
            .samples(formats.samples)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
        AttachmentKind::Depth => description
            .format(formats.depth)
            .samples(formats.samples)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
    }
}

pub fn attachment_descriptions(formats: &AttachmentFormats) -> [vk::AttachmentDescription; 3] {
    ATTACHMENT_ORDER.map(|kind| attachment_description(kind, formats))
}

pub fn clear_value(kind: AttachmentKind, clear_color: [f32; 4]) -> vk::ClearValue {
    match kind {
        AttachmentKind::ResolvedColor | AttachmentKind::MultisampleColor => vk::ClearValue {
            color: vk::ClearColorValue { float32: clear_color },
        },
        AttachmentKind::Depth => vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
        },
    }
}

pub fn clear_values(clear_color: [f32; 4]) -> [vk::ClearValue; 3] {
    ATTACHMENT_ORDER.map(|kind| clear_value(kind, clear_color))
}

/// Views of one swapchain image's attachments.
#[derive(Debug, Clone, Copy)]
pub struct AttachmentViews {
    pub resolved_color: vk::ImageView,
    pub multisample_color: vk::ImageView,
    pub depth: vk::ImageView,
}

impl AttachmentViews {
    pub fn view(&self, kind: AttachmentKind) -> vk::ImageView {
        match kind {
            AttachmentKind::ResolvedColor => self.resolved_color,
            AttachmentKind::MultisampleColor => self.multisample_color,
            AttachmentKind::Depth => self.depth,
        }
    }

    /// Views in framebuffer order.
    pub fn ordered(&self) -> [vk::ImageView; 3] {
        ATTACHMENT_ORDER.map(|kind| self.view(kind))
    }
}
