//! Axis removal for reductions with `keep_dims == false`.
//!
//! The reduce kernels always write an image of the input's rank. When the
//! reduced axes must disappear, the kernel writes into an owned intermediate
//! image of the padded shape (reduced axes kept as 1) and a reshape stage
//! then collapses it onto the real output.

use tensorpack_common::dims::format_dims;
use tensorpack_common::{AccError, AccResult};
use tracing::debug;

use crate::acc::LayerAcc;
use crate::axis::pad_dims;
use crate::image::Blob;
use crate::param::{LayerParam, ReshapeLayerParam};
use crate::reshape::OpenClReshapeLayerAcc;
use crate::runtime::OpenClContext;

#[derive(Debug)]
pub struct ShapeAdapter {
    context: OpenClContext,
    layer: String,
    axes: Vec<usize>,
    padded: Blob,
    stage: Option<OpenClReshapeLayerAcc>,
}

impl ShapeAdapter {
    /// Allocate the padded intermediate for `output`. The reshape stage is
    /// built separately by [`ShapeAdapter::init_stage`].
    pub fn allocate(
        context: &OpenClContext,
        layer: &str,
        output: &Blob,
        axes: &[usize],
    ) -> AccResult<Self> {
        let padded = Self::allocate_padded(context, layer, output, axes)?;
        Ok(Self {
            context: context.clone(),
            layer: layer.to_string(),
            axes: axes.to_vec(),
            padded,
            stage: None,
        })
    }

    fn allocate_padded(
        context: &OpenClContext,
        layer: &str,
        output: &Blob,
        axes: &[usize],
    ) -> AccResult<Blob> {
        let dims = pad_dims(output.dims(), axes)?;
        let image = context.allocate_tensor_image(&dims)?;
        debug!(
            layer,
            padded = %format_dims(&dims),
            real = %format_dims(output.dims()),
            %image,
            "allocated padded reduce output"
        );
        Ok(Blob::new(format!("{layer}_padded"), dims).with_image(image))
    }

    /// Build the padded → real reshape stage.
    pub fn init_stage(&mut self, output: &Blob) -> AccResult<()> {
        self.stage = None;
        let param = ReshapeLayerParam::to_dims(format!("{}_reshape", self.layer), output.dims())?;
        let mut stage = OpenClReshapeLayerAcc::new();
        stage.init(
            &self.context,
            &LayerParam::Reshape(param),
            std::slice::from_ref(&self.padded),
            std::slice::from_ref(output),
        )?;
        self.stage = Some(stage);
        Ok(())
    }

    /// Follow a new real output shape: reallocate the intermediate when the
    /// padded shape changed, then rebind the reshape stage. A stage lost to
    /// an earlier failed build is rebuilt here.
    pub fn reshape(&mut self, output: &Blob) -> AccResult<()> {
        let dims = pad_dims(output.dims(), &self.axes)?;
        let mut rebuild_stage = false;
        if dims != self.padded.dims() {
            let fresh = Self::allocate_padded(&self.context, &self.layer, output, &self.axes)?;
            let stale = std::mem::replace(&mut self.padded, fresh);
            if let Some(image) = stale.handle() {
                self.context.release_image(image);
            }
            rebuild_stage = true;
        }
        let target_changed = self.stage.as_ref().is_some_and(|s| s.target_dims() != output.dims());
        if rebuild_stage || target_changed || self.stage.is_none() {
            self.init_stage(output)?;
        }

        let stage = self.stage.as_mut().ok_or_else(|| {
            AccError::InternalConsistency(format!("{}: reshape stage missing at reshape", self.layer))
        })?;
        stage.reshape(std::slice::from_ref(&self.padded), std::slice::from_ref(output))
    }

    /// Run the reshape stage. The reduce kernel must already be enqueued.
    pub fn forward(&mut self, output: &Blob) -> AccResult<()> {
        let stage = self.stage.as_mut().ok_or_else(|| {
            AccError::InternalConsistency(format!("{}: reshape stage missing at forward", self.layer))
        })?;
        stage.forward(std::slice::from_ref(&self.padded), std::slice::from_ref(output))
    }

    /// The intermediate the reduce kernel writes to.
    pub fn blob(&self) -> &Blob {
        &self.padded
    }

    pub fn padded_dims(&self) -> &[usize] {
        self.padded.dims()
    }

    pub fn stage(&self) -> Option<&OpenClReshapeLayerAcc> {
        self.stage.as_ref()
    }
}

impl Drop for ShapeAdapter {
    fn drop(&mut self) {
        if let Some(image) = self.padded.handle() {
            self.context.release_image(image);
        }
    }
}
