pub mod account;
pub mod dirlist;
pub mod dirtree;

pub use account::AccountView;
pub use dirlist::{DirectoryList, DirectoryLister};
pub use dirtree::{DirectoryTree, TreeRow};
