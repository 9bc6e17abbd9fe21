fn main() {
    println!("cargo:rerun-if-changed=../scan_kernels/src");

    #[cfg(feature = "cuda")]
    cuda_builder::CudaBuilder::new("../scan_kernels")
        .copy_to("../resources/scan_kernels.ptx")
        .build()
        .unwrap();
}
