//! GFX11 usermode queue hooks.

use ember_core::{Error, Result};

use super::{UserqContext, UserqFuncs};
use crate::mes;
use crate::mqd::{self, MqdShadowLayout};
use crate::queue::{QueueState, UsermodeQueue};

/// Shadow address fields of the GFX11 graphics MQD
pub const GFX11_SHADOW_LAYOUT: MqdShadowLayout = MqdShadowLayout {
    shadow_base_lo: 0,
    gds_bkup_base_lo: 2,
    fw_work_area_base_lo: 4,
};

/// GFX11 graphics queue hooks
#[derive(Debug)]
pub struct Gfx11UserqFuncs;

/// Hooks installed for GC 11.x graphics queues
pub static USERQ_GFX_V11_FUNCS: Gfx11UserqFuncs = Gfx11UserqFuncs;

impl Gfx11UserqFuncs {
    fn bind(ctx: &UserqContext<'_>, queue: &mut UsermodeQueue) -> Result<()> {
        mqd::bind_shadow_fields(ctx.device.bos(), queue, &GFX11_SHADOW_LAYOUT)?;
        mes::map(ctx.device, ctx.config, queue)
    }
}

impl UserqFuncs for Gfx11UserqFuncs {
    fn mqd_create(&self, ctx: &UserqContext<'_>, queue: &mut UsermodeQueue) -> Result<()> {
        let bos = ctx.device.bos();
        let init = ctx.device.mqd_initializer(queue.engine).ok_or_else(|| {
            log::error!("no MQD layout for {:?}", queue.engine);
            Error::UnsupportedEngine
        })?;

        mqd::create_mqd(bos, init, queue)?;
        if let Err(err) = mqd::create_context_space(bos, queue) {
            mqd::destroy_mqd(bos, queue);
            return Err(err);
        }
        queue.state = QueueState::DescriptorBuilt;

        if let Err(err) = Self::bind(ctx, queue) {
            mqd::destroy_context_space(bos, queue);
            mqd::destroy_mqd(bos, queue);
            return Err(err);
        }
        queue.state = QueueState::Bound;
        Ok(())
    }

    fn mqd_destroy(&self, ctx: &UserqContext<'_>, queue: &mut UsermodeQueue) {
        let bos = ctx.device.bos();
        mes::unmap(ctx.device, queue);
        mqd::destroy_context_space(bos, queue);
        mqd::destroy_mqd(bos, queue);
    }
}
