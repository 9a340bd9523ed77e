use std::path::Path;
use std::sync::Arc;

use super::tree::Tree;
use crate::dbheader::DatabaseHeader;
use crate::error::Result;
use crate::pager::Pager;

/// Hands out trees that share one pager.
#[derive(Clone)]
pub struct TreeManager {
  pager: Arc<Pager>,
}

impl TreeManager {
  pub fn new(pager: Arc<Pager>) -> Self {
    Self { pager }
  }

  pub fn open(path: impl AsRef<Path>) -> Result<Self> {
    Ok(Self::new(Arc::new(Pager::open(path)?)))
  }

  pub fn pager(&self) -> &Arc<Pager> {
    &self.pager
  }

  pub fn header(&self) -> Result<DatabaseHeader> {
    self.pager.header()
  }

  pub fn open_tree(&self, root_page: u32) -> Result<Tree> {
    Tree::open(self.pager.clone(), root_page)
  }

  pub fn close(&self) -> Result<()> {
    self.pager.close()
  }
}
