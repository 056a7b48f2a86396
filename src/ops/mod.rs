pub mod inpaint;
pub mod patchmatch;
pub mod pyramid;
pub mod synthesis;
