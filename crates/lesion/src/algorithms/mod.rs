pub mod attribution;
pub mod clustering;
pub mod colormap;
pub mod contours;
pub mod morphology;
pub mod overlay;

pub use attribution::*;
pub use clustering::*;
pub use colormap::*;
pub use contours::*;
pub use morphology::*;
pub use overlay::*;
