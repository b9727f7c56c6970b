pub mod actor;
pub mod executor;
pub mod fixture;
pub mod page;
pub mod scanner;

pub use actor::{spawn_surface, SurfaceError, SurfaceHandle, SurfaceInjector};
pub use executor::{ExecStatus, Executor};
pub use fixture::{FixtureInjector, FixtureNode, FixturePage, FixtureSpec};
pub use page::{NodeHandle, PageDriver, PageError, RawNode};
pub use scanner::{ElementRegistry, Scanner};
