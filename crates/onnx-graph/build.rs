fn main() {
    // Compile the ONNX schema into Rust message types under $OUT_DIR/onnx-protos
    protobuf_codegen::Codegen::new()
        .pure()
        .includes(["src"])
        .input("src/protos/onnx.proto")
        .cargo_out_dir("onnx-protos")
        .run_from_script();
}
